// Copyright 2025 The actlite authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Callback binding: the invocable unit an activity runs on its worker
//! thread.

use crate::cancel::CancelToken;
use std::sync::Arc;

/// An invocable unit bound to an [`Activity`](crate::Activity), type-erased
/// so the activity doesn't need to know the receiver's concrete type.
///
/// The binding is invoked exactly once per worker run, synchronously, on the
/// worker thread. It receives the activity's [`CancelToken`] so that
/// long-running operations can observe cancellation at their own
/// checkpoints. Any panic raised by the operation fails the hosting worker
/// thread (reported as a [`Panicked`](crate::Completion::Panicked)
/// completion), never the process.
///
/// Closures implement this trait directly, so most callers never name it:
///
/// ```
/// use actlite::Activity;
///
/// let activity = Activity::from_fn(|cancel| {
///     while !cancel.is_cancelled() {
///         // do a bounded amount of work...
///         # break;
///     }
/// });
/// ```
pub trait Invoke: Send + Sync {
    /// Calls the bound operation once.
    fn invoke(&self, cancel: &CancelToken);
}

impl<F> Invoke for F
where
    F: Fn(&CancelToken) + Send + Sync,
{
    fn invoke(&self, cancel: &CancelToken) {
        self(cancel)
    }
}

/// A callback binding pairing a shared receiver with one of its operations.
///
/// This is the method-pointer form of [`Invoke`]: the receiver is held via a
/// shared [`Arc`] handle (the binding never owns the receiver's lifetime
/// exclusively), and the bound operation is immutable once constructed —
/// invocation always dispatches to the same receiver/operation pair.
pub struct MethodBinding<R> {
    receiver: Arc<R>,
    method: fn(&R, &CancelToken),
}

impl<R> MethodBinding<R> {
    /// Binds the given operation on the given receiver.
    pub fn new(receiver: Arc<R>, method: fn(&R, &CancelToken)) -> Self {
        Self { receiver, method }
    }
}

impl<R: Send + Sync> Invoke for MethodBinding<R> {
    fn invoke(&self, cancel: &CancelToken) {
        (self.method)(&self.receiver, cancel)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        count: AtomicUsize,
    }

    impl Counter {
        fn bump(&self, _cancel: &CancelToken) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn method_binding_dispatches_to_the_bound_pair() {
        let counter = Arc::new(Counter {
            count: AtomicUsize::new(0),
        });
        let binding = MethodBinding::new(counter.clone(), Counter::bump);
        let token = CancelToken::new();

        binding.invoke(&token);
        binding.invoke(&token);
        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn closures_are_invocable() {
        let count = AtomicUsize::new(0);
        let token = CancelToken::new();
        let closure = |_cancel: &CancelToken| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        closure.invoke(&token);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
