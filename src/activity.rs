// Copyright 2025 The actlite authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The activity: one OS thread bound to a single callback, with cooperative
//! cancellation and CPU-affinity bookkeeping.

use crate::callback::{Invoke, MethodBinding};
use crate::cancel::{CancelToken, CancelUnwind};
use crate::error::{Error, Result};
use crate::macros::{log_debug, log_error};
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use crate::macros::log_warn;
use crate::util::Status;
#[cfg(all(
    not(miri),
    any(target_os = "android", target_os = "linux")
))]
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Default upper bound on the core identifiers scanned when re-deriving the
/// affinity set from the OS-reported mask in [`Activity::affinity()`].
pub const DEFAULT_CORE_SCAN_LIMIT: usize = 128;

/// How the most recent worker run of an [`Activity`] terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The bound operation returned normally. This includes operations that
    /// observed [`CancelToken::is_cancelled()`] and chose to return on their
    /// own.
    Finished,
    /// A cancellation request was delivered at a
    /// [`checkpoint()`](CancelToken::checkpoint) and terminated the bound
    /// operation there.
    Cancelled,
    /// The bound operation panicked. The panic was confined to the worker
    /// thread.
    Panicked,
}

/// Externally observable state of an [`Activity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// No worker thread was ever started.
    Idle,
    /// A worker thread exists and is executing, or about to execute, the
    /// bound callback.
    Running,
    /// The bound operation terminated without a delivered cancellation,
    /// either by returning normally or by panicking.
    Finished,
    /// A cancellation request was delivered and terminated the bound
    /// operation at a checkpoint.
    Stopped,
}

/// Internal execution state, transitioned only through defined operations.
#[derive(Debug, Clone, Copy)]
enum ExecState {
    /// No worker thread was ever started.
    Idle,
    /// A worker thread exists for the current run.
    Running,
    /// The most recent worker run reached its terminal state.
    Done(Completion),
}

/// Acknowledgment sent by the worker thread once its startup preamble
/// (thread-id publication and optional CPU pinning) has completed.
enum StartupAck {
    /// The worker hasn't finished its preamble yet.
    Pending,
    /// The preamble succeeded; the callback is about to run.
    Ready,
    /// Applying the startup affinity failed; the worker exits without
    /// invoking the callback.
    Failed(Error),
}

/// Affinity bookkeeping: the cached core set plus the OS-level identity of
/// the worker thread it mirrors. Guarded by a single lock so that
/// read-modify-write mutations don't race each other.
struct AffinityBook {
    /// Cores the current worker is constrained to. Empty means no
    /// constraint, OS default placement.
    cores: BTreeSet<usize>,
    /// Thread id of the current worker, published during its startup
    /// preamble.
    #[cfg(all(
        not(miri),
        any(target_os = "android", target_os = "linux")
    ))]
    tid: Option<Pid>,
}

/// State shared between an [`Activity`] and its worker thread.
struct Inner {
    /// Execution state, with a condvar for joiners that lost the race for
    /// the thread handle.
    state: Status<ExecState>,
    /// Startup handshake for the current run.
    startup: Status<StartupAck>,
    /// Affinity bookkeeping for the current run.
    affinity: Mutex<AffinityBook>,
    /// Cancellation token observed by the bound operation.
    cancel: CancelToken,
}

/// A unit of concurrent execution: one OS thread bound to a single
/// callback, with cooperative cancellation and CPU-affinity bookkeeping.
///
/// An activity starts [`Idle`](ActivityState::Idle). [`start()`](Self::start)
/// spawns a worker thread that invokes the bound callback exactly once; the
/// run terminates when the callback returns, panics, or observes a delivered
/// cancellation at a [`CancelToken::checkpoint()`]. Restarting after a
/// terminal state is supported; each start resets the cancellation token and
/// the affinity bookkeeping.
///
/// Dropping an activity whose worker is still running requests cancellation
/// and joins the worker, so the thread never outlives its owner. An
/// operation that ignores its cancel token delays that join until it returns
/// naturally.
///
/// ```
/// use actlite::{Activity, Completion};
///
/// let activity = Activity::from_fn(|_cancel| {
///     // one-shot unit of work
/// });
/// activity.start()?;
/// assert_eq!(activity.join()?, Completion::Finished);
/// assert!(!activity.is_running());
/// # Ok::<(), actlite::Error>(())
/// ```
pub struct Activity {
    /// State shared with the worker thread.
    inner: Arc<Inner>,
    /// Callback binding, shared with the worker thread so that dropping the
    /// activity mid-invocation never invalidates the callback.
    callback: Arc<dyn Invoke>,
    /// Handle of the current worker thread, taken exactly once per run by
    /// whichever joiner gets there first.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Activity {
    /// Creates an idle activity bound to the given callback.
    pub fn new(callback: Arc<dyn Invoke>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Status::new(ExecState::Idle),
                startup: Status::new(StartupAck::Pending),
                affinity: Mutex::new(AffinityBook {
                    cores: BTreeSet::new(),
                    #[cfg(all(
                        not(miri),
                        any(target_os = "android", target_os = "linux")
                    ))]
                    tid: None,
                }),
                cancel: CancelToken::new(),
            }),
            callback,
            handle: Mutex::new(None),
        }
    }

    /// Creates an idle activity bound to the given closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&CancelToken) + Send + Sync + 'static,
    {
        Self::new(Arc::new(f))
    }

    /// Creates an idle activity bound to one operation on a shared receiver,
    /// via a [`MethodBinding`].
    pub fn bind<R: Send + Sync + 'static>(
        receiver: Arc<R>,
        method: fn(&R, &CancelToken),
    ) -> Self {
        Self::new(Arc::new(MethodBinding::new(receiver, method)))
    }

    /// Starts the activity: spawns a worker thread that invokes the bound
    /// callback once, with no affinity constraint.
    ///
    /// Returns once the worker has completed its startup preamble, before
    /// the callback runs. Fails with [`Error::AlreadyRunning`] if a worker
    /// is already live, and with [`Error::Spawn`] if the OS couldn't create
    /// the thread (in which case the activity is rolled back to its previous
    /// state and starting can be retried).
    pub fn start(&self) -> Result<()> {
        self.start_inner(BTreeSet::new())
    }

    /// Starts the activity with the worker constrained to the given cores
    /// from the moment it starts, before the callback runs.
    ///
    /// An empty `cores` slice behaves exactly like [`start()`](Self::start).
    /// If applying the mask fails, the worker exits without invoking the
    /// callback and this returns the affinity error. On platforms without
    /// affinity support, a non-empty `cores` slice fails with
    /// [`Error::AffinityUnsupported`] without spawning anything.
    pub fn start_pinned(&self, cores: &[usize]) -> Result<()> {
        if !cores.is_empty() {
            #[cfg(all(
                not(miri),
                any(
                    target_os = "android",
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "linux"
                )
            ))]
            for &core in cores {
                if core >= crate::affinity::capacity() {
                    return Err(Error::InvalidCore(core));
                }
            }
            #[cfg(any(
                miri,
                not(any(
                    target_os = "android",
                    target_os = "dragonfly",
                    target_os = "freebsd",
                    target_os = "linux"
                ))
            ))]
            return Err(Error::AffinityUnsupported);
        }
        self.start_inner(cores.iter().copied().collect())
    }

    fn start_inner(&self, cores: BTreeSet<usize>) -> Result<()> {
        let mut state = self.inner.state.lock();
        let previous = *state;
        if let ExecState::Running = previous {
            return Err(Error::AlreadyRunning);
        }

        // Reclaim the handle of a previous, already-terminated run. The
        // worker reaches its terminal state before exiting, so this join is
        // immediate.
        if let Some(old) = self.handle.lock().unwrap().take() {
            let _ = old.join();
        }

        // Reset the per-run shared state before the new worker can observe
        // it.
        self.inner.cancel.reset();
        *self.inner.startup.lock() = StartupAck::Pending;
        {
            let mut book = self.inner.affinity.lock().unwrap();
            book.cores = cores;
            #[cfg(all(
                not(miri),
                any(target_os = "android", target_os = "linux")
            ))]
            {
                book.tid = None;
            }
        }

        // The running flag is set optimistically; a failed spawn or a failed
        // startup preamble rolls it back.
        *state = ExecState::Running;

        let inner = self.inner.clone();
        let callback = self.callback.clone();
        let spawned = std::thread::Builder::new()
            .name("activity".to_string())
            .spawn(move || worker_main(inner, callback));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                *state = previous;
                return Err(Error::Spawn(e));
            }
        };
        *self.handle.lock().unwrap() = Some(handle);
        drop(state);
        log_debug!("[activity] spawned a worker thread");

        let mut ack = self
            .inner
            .startup
            .wait_while(|ack| matches!(ack, StartupAck::Pending));
        match std::mem::replace(&mut *ack, StartupAck::Pending) {
            StartupAck::Ready => {
                drop(ack);
                Ok(())
            }
            StartupAck::Failed(e) => {
                drop(ack);
                // The worker exited without invoking the callback.
                if let Some(handle) = self.handle.lock().unwrap().take() {
                    let _ = handle.join();
                }
                self.inner.state.notify_all(previous);
                Err(e)
            }
            StartupAck::Pending => unreachable!("startup ack observed pending after the wait"),
        }
    }

    /// Requests cooperative cancellation of the worker, then blocks until it
    /// has terminated.
    ///
    /// The request only takes effect at the bound operation's next
    /// [`CancelToken::checkpoint()`] (or
    /// [`CancelToken::is_cancelled()`](CancelToken::is_cancelled)
    /// observation); an operation that never
    /// checks in keeps this call blocked until it returns naturally, by
    /// design, rather than silently timing out.
    ///
    /// Idempotent-safe: stopping an already-terminated activity is a no-op
    /// returning `Ok`, never a double-join. Stopping a never-started
    /// activity fails with [`Error::NotStarted`].
    pub fn stop(&self) -> Result<()> {
        match self.inner.state.current() {
            ExecState::Idle => Err(Error::NotStarted),
            ExecState::Done(_) => Ok(()),
            ExecState::Running => {
                log_debug!("[activity] stop requested, cancelling the worker...");
                self.inner.cancel.request();
                self.join().map(|_| ())
            }
        }
    }

    /// Blocks until the worker thread terminates, and returns how it did.
    ///
    /// Safe to call from several threads at once: whichever caller gets the
    /// thread handle joins the OS thread, the others wait for the terminal
    /// state. There is no timeout variant; this blocks indefinitely until
    /// the worker exits. Fails with [`Error::NotStarted`] if the activity
    /// was never started.
    pub fn join(&self) -> Result<Completion> {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                // The worker harness catches all callback panics, so the
                // thread itself never unwinds out.
                log_error!("[activity] the worker thread itself panicked");
            }
        }

        let state = self
            .inner
            .state
            .wait_while(|state| matches!(state, ExecState::Running));
        match *state {
            ExecState::Idle => Err(Error::NotStarted),
            ExecState::Done(completion) => Ok(completion),
            ExecState::Running => unreachable!("state observed running after the wait"),
        }
    }

    /// Returns whether the worker is currently running.
    ///
    /// This is a best-effort snapshot: it can race with the worker's own
    /// termination, and must not be used as a synchronization primitive.
    /// Use [`join()`](Self::join) to synchronize with termination.
    pub fn is_running(&self) -> bool {
        matches!(self.inner.state.current(), ExecState::Running)
    }

    /// Returns the externally observable state of the activity.
    ///
    /// Like [`is_running()`](Self::is_running), this is a best-effort
    /// snapshot.
    pub fn state(&self) -> ActivityState {
        match self.inner.state.current() {
            ExecState::Idle => ActivityState::Idle,
            ExecState::Running => ActivityState::Running,
            ExecState::Done(Completion::Cancelled) => ActivityState::Stopped,
            ExecState::Done(_) => ActivityState::Finished,
        }
    }

    /// Returns a clone of the activity's cancellation token, e.g. to share
    /// with collaborators that should be able to request or observe
    /// cancellation without holding the activity itself.
    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    /// Replaces the affinity mask of the running worker with the given
    /// cores, and updates the cached bookkeeping.
    ///
    /// An empty `cores` slice removes any constraint (OS default placement).
    /// Requires a live worker: fails with [`Error::NotStarted`] otherwise.
    /// Only available on Linux and Android, where another thread of the
    /// process can be targeted by id; elsewhere this fails with
    /// [`Error::AffinityUnsupported`].
    pub fn set_affinity(&self, cores: &[usize]) -> Result<()> {
        #[cfg(all(
            not(miri),
            any(target_os = "android", target_os = "linux")
        ))]
        {
            // The running check is made before taking the affinity lock:
            // `start_inner()` locks in the opposite order. A worker dying in
            // between surfaces as an `Affinity` error from the syscall.
            if !self.is_running() {
                return Err(Error::NotStarted);
            }
            let mut book = self.inner.affinity.lock().unwrap();
            let tid = book.tid.ok_or(Error::NotStarted)?;
            let requested: BTreeSet<usize> = cores.iter().copied().collect();
            crate::affinity::set_for(tid, &requested)?;
            log_debug!("[activity] replaced the worker affinity with {requested:?}");
            book.cores = requested;
            Ok(())
        }
        #[cfg(any(
            miri,
            not(any(target_os = "android", target_os = "linux"))
        ))]
        {
            let _ = cores;
            Err(Error::AffinityUnsupported)
        }
    }

    /// Adds one core to the affinity mask of the running worker: reads the
    /// current OS-reported mask, inserts the core, and reapplies the result.
    ///
    /// The read-modify-write is serialized against the other affinity
    /// operations on this activity by an internal lock, but not against
    /// direct affinity syscalls made elsewhere. Requires a live worker, and
    /// platform support as for [`set_affinity()`](Self::set_affinity).
    pub fn add_affinity(&self, core: usize) -> Result<()> {
        #[cfg(all(
            not(miri),
            any(target_os = "android", target_os = "linux")
        ))]
        {
            if !self.is_running() {
                return Err(Error::NotStarted);
            }
            let mut book = self.inner.affinity.lock().unwrap();
            let tid = book.tid.ok_or(Error::NotStarted)?;
            let mut cores = crate::affinity::query_for(tid, crate::affinity::capacity())?;
            cores.insert(core);
            crate::affinity::set_for(tid, &cores)?;
            log_debug!("[activity] added core {core} to the worker affinity");
            book.cores = cores;
            Ok(())
        }
        #[cfg(any(
            miri,
            not(any(target_os = "android", target_os = "linux"))
        ))]
        {
            let _ = core;
            Err(Error::AffinityUnsupported)
        }
    }

    /// Re-derives the affinity set of the running worker from the
    /// OS-reported mask, scanning core identifiers up to
    /// [`DEFAULT_CORE_SCAN_LIMIT`].
    ///
    /// This is a query with a side effect: the cached bookkeeping is
    /// resynchronized with whatever the OS reports. Requires a live worker,
    /// and platform support as for [`set_affinity()`](Self::set_affinity).
    pub fn affinity(&self) -> Result<BTreeSet<usize>> {
        self.affinity_up_to(DEFAULT_CORE_SCAN_LIMIT)
    }

    /// Like [`affinity()`](Self::affinity), scanning core identifiers in
    /// `0..scan_limit` instead of the default bound.
    pub fn affinity_up_to(&self, scan_limit: usize) -> Result<BTreeSet<usize>> {
        #[cfg(all(
            not(miri),
            any(target_os = "android", target_os = "linux")
        ))]
        {
            if !self.is_running() {
                return Err(Error::NotStarted);
            }
            let mut book = self.inner.affinity.lock().unwrap();
            let tid = book.tid.ok_or(Error::NotStarted)?;
            let cores = crate::affinity::query_for(tid, scan_limit)?;
            book.cores = cores.clone();
            Ok(cores)
        }
        #[cfg(any(
            miri,
            not(any(target_os = "android", target_os = "linux"))
        ))]
        {
            let _ = scan_limit;
            Err(Error::AffinityUnsupported)
        }
    }

    /// Reserved for future scheduling-priority support; currently inert and
    /// always returns `Ok`.
    pub fn set_priority(&self, _priority: i32) -> Result<()> {
        Ok(())
    }
}

impl Drop for Activity {
    /// Requests cancellation and joins the worker if it is still running, so
    /// that the thread never outlives the owning activity.
    fn drop(&mut self) {
        if matches!(self.inner.state.current(), ExecState::Running) {
            log_debug!("[activity] dropping a running activity, joining its worker...");
            self.inner.cancel.request();
            let _result = self.join();
            log_debug!("[activity] worker joined on drop: {_result:?}");
        }
    }
}

/// Main function run by the worker thread.
fn worker_main(inner: Arc<Inner>, callback: Arc<dyn Invoke>) {
    // Startup preamble: publish the thread id, then apply the startup
    // affinity hint before the callback can run.
    #[cfg(all(
        not(miri),
        any(target_os = "android", target_os = "linux")
    ))]
    {
        inner.affinity.lock().unwrap().tid = Some(crate::affinity::current_thread_id());
    }

    let pinned = inner.affinity.lock().unwrap().cores.clone();
    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    if !pinned.is_empty() {
        match crate::affinity::pin_current(&pinned) {
            Ok(()) => log_debug!("[activity worker] pinned to cores {pinned:?}"),
            Err(e) => {
                log_warn!("[activity worker] failed to apply the startup affinity: {e}");
                inner.startup.notify_all(StartupAck::Failed(e));
                return;
            }
        }
    }
    // A non-empty hint is rejected before spawning on other platforms.
    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    let _ = &pinned;

    inner.startup.notify_all(StartupAck::Ready);

    let result = catch_unwind(AssertUnwindSafe(|| callback.invoke(&inner.cancel)));
    let completion = match result {
        Ok(()) => Completion::Finished,
        Err(payload) if payload.is::<CancelUnwind>() => Completion::Cancelled,
        Err(_payload) => {
            log_error!("[activity worker] the bound operation panicked");
            Completion::Panicked
        }
    };
    log_debug!("[activity worker] terminating with completion: {completion:?}");

    // The terminal state is published from inside the thread itself, as its
    // last action before exiting.
    inner.state.notify_all(ExecState::Done(completion));
}

/// Voluntarily relinquishes the remaining scheduling quantum of the calling
/// thread. A cooperative-multitasking hint, not a correctness primitive: no
/// wake condition is defined.
pub fn yield_now() {
    std::thread::yield_now();
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// An operation that spins until cancellation is requested, returning
    /// normally rather than unwinding.
    fn spin_until_cancelled(cancel: &CancelToken) {
        while !cancel.is_cancelled() {
            yield_now();
        }
    }

    #[test]
    fn start_then_join_finishes() {
        init_logger();
        let activity = Activity::from_fn(|_cancel| {});
        assert_eq!(activity.state(), ActivityState::Idle);

        activity.start().unwrap();
        assert_eq!(activity.join().unwrap(), Completion::Finished);
        assert!(!activity.is_running());
        assert_eq!(activity.state(), ActivityState::Finished);
    }

    #[test]
    fn is_running_while_the_operation_runs() {
        let barrier = Arc::new(Barrier::new(2));
        let activity = Activity::from_fn({
            let barrier = barrier.clone();
            move |cancel| {
                barrier.wait();
                spin_until_cancelled(cancel);
            }
        });

        activity.start().unwrap();
        barrier.wait();
        assert!(activity.is_running());
        assert_eq!(activity.state(), ActivityState::Running);

        activity.stop().unwrap();
        assert!(!activity.is_running());
        // The operation observed the token and returned on its own.
        assert_eq!(activity.state(), ActivityState::Finished);
    }

    #[test]
    fn double_start_is_rejected() {
        let activity = Activity::from_fn(spin_until_cancelled);
        activity.start().unwrap();
        assert!(matches!(activity.start(), Err(Error::AlreadyRunning)));
        activity.stop().unwrap();
    }

    #[test]
    fn stop_twice_is_a_noop() {
        let activity = Activity::from_fn(spin_until_cancelled);
        activity.start().unwrap();
        activity.stop().unwrap();
        activity.stop().unwrap();
        assert!(!activity.is_running());
    }

    #[test]
    fn stop_before_start_is_an_error() {
        let activity = Activity::from_fn(|_cancel| {});
        assert!(matches!(activity.stop(), Err(Error::NotStarted)));
    }

    #[test]
    fn join_before_start_is_an_error() {
        let activity = Activity::from_fn(|_cancel| {});
        assert!(matches!(activity.join(), Err(Error::NotStarted)));
    }

    #[test]
    fn checkpoint_delivers_cancellation() {
        init_logger();
        let barrier = Arc::new(Barrier::new(2));
        let activity = Activity::from_fn({
            let barrier = barrier.clone();
            move |cancel| {
                barrier.wait();
                loop {
                    cancel.checkpoint();
                    yield_now();
                }
            }
        });

        activity.start().unwrap();
        barrier.wait();
        activity.stop().unwrap();
        assert_eq!(activity.state(), ActivityState::Stopped);
    }

    #[test]
    fn delivered_cancellation_bypasses_the_panic_hook() {
        init_logger();
        // Other tests panic on purpose, so only count unwinds carrying the
        // cancellation marker: a delivered cancellation must never reach
        // the process-wide hook.
        let deliveries = Arc::new(AtomicUsize::new(0));
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new({
            let deliveries = deliveries.clone();
            move |info| {
                if info.payload().is::<CancelUnwind>() {
                    deliveries.fetch_add(1, Ordering::SeqCst);
                }
                previous(info);
            }
        }));

        let barrier = Arc::new(Barrier::new(2));
        let activity = Activity::from_fn({
            let barrier = barrier.clone();
            move |cancel| {
                barrier.wait();
                loop {
                    cancel.checkpoint();
                    yield_now();
                }
            }
        });
        activity.start().unwrap();
        barrier.wait();
        activity.stop().unwrap();

        assert_eq!(activity.state(), ActivityState::Stopped);
        assert_eq!(deliveries.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_waits_for_an_operation_that_never_checks_in() {
        let activity = Activity::from_fn(|_cancel| {
            std::thread::sleep(Duration::from_millis(20));
        });
        activity.start().unwrap();
        // The operation ignores the token, so stop blocks until its natural
        // return and the run counts as finished.
        activity.stop().unwrap();
        assert_eq!(activity.state(), ActivityState::Finished);
    }

    #[test]
    fn restart_after_finish_and_after_stop() {
        let runs = Arc::new(AtomicUsize::new(0));
        let activity = Activity::from_fn({
            let runs = runs.clone();
            move |cancel| {
                runs.fetch_add(1, Ordering::SeqCst);
                spin_until_cancelled(cancel);
            }
        });

        activity.start().unwrap();
        activity.stop().unwrap();
        activity.start().unwrap();
        activity.stop().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let oneshot = Activity::from_fn(|_cancel| {});
        oneshot.start().unwrap();
        assert_eq!(oneshot.join().unwrap(), Completion::Finished);
        oneshot.start().unwrap();
        assert_eq!(oneshot.join().unwrap(), Completion::Finished);
    }

    #[test]
    fn panicking_operation_is_confined_to_the_worker() {
        init_logger();
        let activity = Activity::from_fn(|_cancel| panic!("boom"));
        activity.start().unwrap();
        assert_eq!(activity.join().unwrap(), Completion::Panicked);
        assert!(!activity.is_running());
        assert_eq!(activity.state(), ActivityState::Finished);
    }

    #[test]
    fn shared_token_can_cancel_without_stop() {
        let activity = Activity::from_fn(spin_until_cancelled);
        let token = activity.cancel_token();
        activity.start().unwrap();
        token.request();
        assert_eq!(activity.join().unwrap(), Completion::Finished);
    }

    #[test]
    fn method_binding_runs_on_the_worker() {
        struct Receiver {
            calls: AtomicUsize,
        }
        impl Receiver {
            fn work(&self, _cancel: &CancelToken) {
                self.calls.fetch_add(1, Ordering::SeqCst);
            }
        }

        let receiver = Arc::new(Receiver {
            calls: AtomicUsize::new(0),
        });
        let activity = Activity::bind(receiver.clone(), Receiver::work);
        activity.start().unwrap();
        activity.join().unwrap();
        assert_eq!(receiver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_a_running_activity_joins_its_worker() {
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let activity = Activity::from_fn({
                let runs = runs.clone();
                move |cancel| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    spin_until_cancelled(cancel);
                }
            });
            activity.start().unwrap();
        }
        // The drop requested cancellation and joined, so the run completed.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_priority_is_inert() {
        let activity = Activity::from_fn(|_cancel| {});
        activity.set_priority(42).unwrap();
    }

    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    #[test]
    fn start_pinned_rejects_an_out_of_range_core() {
        let activity = Activity::from_fn(|_cancel| {});
        assert!(matches!(
            activity.start_pinned(&[100_000]),
            Err(Error::InvalidCore(100_000))
        ));
        assert_eq!(activity.state(), ActivityState::Idle);

        // The rejection left the activity startable.
        activity.start().unwrap();
        assert_eq!(activity.join().unwrap(), Completion::Finished);
    }

    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    #[test]
    fn start_pinned_is_unsupported_on_this_platform() {
        let activity = Activity::from_fn(|_cancel| {});
        assert!(matches!(
            activity.start_pinned(&[0]),
            Err(Error::AffinityUnsupported)
        ));
        assert_eq!(activity.state(), ActivityState::Idle);
    }

    #[cfg(all(
        not(miri),
        any(target_os = "android", target_os = "linux")
    ))]
    mod affinity_ops {
        use super::*;

        #[test]
        fn start_pinned_constrains_the_worker() {
            init_logger();
            let activity = Activity::from_fn(spin_until_cancelled);
            activity.start_pinned(&[0]).unwrap();
            assert_eq!(activity.affinity().unwrap(), BTreeSet::from([0]));
            activity.stop().unwrap();
        }

        #[test]
        fn set_then_query_then_add() {
            init_logger();
            if std::thread::available_parallelism().unwrap().get() < 6 {
                // The asserted core sets need a host with at least 6 cores.
                return;
            }

            let activity = Activity::from_fn(spin_until_cancelled);
            activity.start().unwrap();

            activity.set_affinity(&[2, 5]).unwrap();
            assert_eq!(activity.affinity().unwrap(), BTreeSet::from([2, 5]));

            activity.add_affinity(3).unwrap();
            assert_eq!(activity.affinity().unwrap(), BTreeSet::from([2, 3, 5]));

            activity.stop().unwrap();
        }

        #[test]
        fn empty_set_removes_the_constraint() {
            // The unconstrained mask of this (unpinned) test thread is the
            // mask the worker should come back to.
            let baseline = crate::affinity::query_for(
                crate::affinity::current_thread_id(),
                DEFAULT_CORE_SCAN_LIMIT,
            )
            .unwrap();

            let activity = Activity::from_fn(spin_until_cancelled);
            activity.start_pinned(&[0]).unwrap();
            assert_eq!(activity.affinity().unwrap(), BTreeSet::from([0]));

            activity.set_affinity(&[]).unwrap();
            assert_eq!(activity.affinity().unwrap(), baseline);

            activity.stop().unwrap();
        }

        #[test]
        fn affinity_operations_require_a_live_worker() {
            let activity = Activity::from_fn(|_cancel| {});
            assert!(matches!(activity.set_affinity(&[0]), Err(Error::NotStarted)));
            assert!(matches!(activity.add_affinity(0), Err(Error::NotStarted)));
            assert!(matches!(activity.affinity(), Err(Error::NotStarted)));

            activity.start().unwrap();
            activity.join().unwrap();
            assert!(matches!(activity.set_affinity(&[0]), Err(Error::NotStarted)));
        }
    }
}
