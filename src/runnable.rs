// Copyright 2025 The actlite authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The `Runnable` convenience facade: "can be run once on its own thread".

use crate::activity::Activity;
use crate::cancel::CancelToken;
use crate::error::Result;
use std::sync::Arc;

/// The capability of being run once on a dedicated thread.
///
/// Implementors receive the activity's [`CancelToken`] and must observe it
/// themselves (via [`checkpoint()`](CancelToken::checkpoint) or
/// [`is_cancelled()`](CancelToken::is_cancelled)) during long-running work
/// if they want [`RunnableHandle::stop()`] to take effect before natural
/// completion.
pub trait Runnable: Send + Sync + 'static {
    /// The operation to run on the dedicated thread.
    fn run(&self, cancel: &CancelToken);
}

/// A facade that drives a [`Runnable`] receiver through an internally owned
/// [`Activity`] bound to the receiver's [`run()`](Runnable::run) operation.
///
/// All calls delegate 1:1 to the activity; [`task()`](Self::task) exposes it
/// for the operations the facade doesn't forward (join, affinity, ...).
///
/// ```
/// use actlite::{CancelToken, Runnable, RunnableHandle};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// struct Ticker {
///     ticks: AtomicUsize,
/// }
///
/// impl Runnable for Ticker {
///     fn run(&self, cancel: &CancelToken) {
///         loop {
///             self.ticks.fetch_add(1, Ordering::Relaxed);
///             if cancel.is_cancelled() {
///                 break;
///             }
///             std::thread::yield_now();
///         }
///     }
/// }
///
/// let handle = RunnableHandle::new(Arc::new(Ticker {
///     ticks: AtomicUsize::new(0),
/// }));
/// handle.start()?;
/// handle.stop()?;
/// assert!(handle.receiver().ticks.load(Ordering::Relaxed) >= 1);
/// # Ok::<(), actlite::Error>(())
/// ```
pub struct RunnableHandle<R: Runnable> {
    /// The receiver, shared with the activity's callback binding.
    receiver: Arc<R>,
    /// The internally owned activity bound to the receiver's `run`.
    task: Activity,
}

impl<R: Runnable> RunnableHandle<R> {
    /// Creates an idle handle around the given receiver.
    pub fn new(receiver: Arc<R>) -> Self {
        let task = Activity::bind(receiver.clone(), R::run);
        Self { receiver, task }
    }

    /// Starts the receiver's `run` operation on a dedicated thread.
    pub fn start(&self) -> Result<()> {
        self.task.start()
    }

    /// Requests cooperative cancellation and joins the thread.
    pub fn stop(&self) -> Result<()> {
        self.task.stop()
    }

    /// Returns whether the `run` operation is currently running
    /// (best-effort snapshot).
    pub fn running(&self) -> bool {
        self.task.is_running()
    }

    /// Accesses the receiver.
    pub fn receiver(&self) -> &Arc<R> {
        &self.receiver
    }

    /// Accesses the underlying activity.
    pub fn task(&self) -> &Activity {
        &self.task
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::activity::{ActivityState, Completion};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ticker {
        ticks: AtomicUsize,
    }

    impl Runnable for Ticker {
        fn run(&self, cancel: &CancelToken) {
            loop {
                self.ticks.fetch_add(1, Ordering::SeqCst);
                if cancel.is_cancelled() {
                    break;
                }
                std::thread::yield_now();
            }
        }
    }

    struct OneShot {
        calls: AtomicUsize,
    }

    impl Runnable for OneShot {
        fn run(&self, _cancel: &CancelToken) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn start_stop_running_delegate_to_the_activity() {
        let handle = RunnableHandle::new(Arc::new(Ticker {
            ticks: AtomicUsize::new(0),
        }));
        assert!(!handle.running());

        handle.start().unwrap();
        handle.stop().unwrap();
        assert!(!handle.running());
        assert!(handle.receiver().ticks.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn run_to_completion_through_the_task_accessor() {
        let handle = RunnableHandle::new(Arc::new(OneShot {
            calls: AtomicUsize::new(0),
        }));
        handle.start().unwrap();
        assert_eq!(handle.task().join().unwrap(), Completion::Finished);
        assert_eq!(handle.task().state(), ActivityState::Finished);
        assert_eq!(handle.receiver().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn restart_runs_the_receiver_again() {
        let handle = RunnableHandle::new(Arc::new(OneShot {
            calls: AtomicUsize::new(0),
        }));
        handle.start().unwrap();
        handle.task().join().unwrap();
        handle.start().unwrap();
        handle.task().join().unwrap();
        assert_eq!(handle.receiver().calls.load(Ordering::SeqCst), 2);
    }
}
