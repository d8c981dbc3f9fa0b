// Copyright 2025 The actlite authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Cooperative cancellation token.

use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation token shared between an
/// [`Activity`](crate::Activity) and its worker thread.
///
/// Cancellation is cooperative: requesting it (via
/// [`Activity::stop()`](crate::Activity::stop)) has no effect until the
/// bound operation observes the token, either by calling
/// [`checkpoint()`](Self::checkpoint) or by polling
/// [`is_cancelled()`](Self::is_cancelled) and returning on its own. An
/// operation that never checks in runs to natural completion, with no upper
/// bound on cancellation latency.
///
/// Tokens are cheap to clone; all clones observe the same cancellation
/// state.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<CachePadded<AtomicBool>>,
}

/// Marker payload carried by the unwind that [`CancelToken::checkpoint()`]
/// starts. The worker harness downcasts caught panics to this type to tell
/// a delivered cancellation apart from a genuine panic in the bound
/// operation.
pub(crate) struct CancelUnwind;

impl CancelToken {
    /// Creates a token with no pending cancellation.
    pub(crate) fn new() -> Self {
        Self {
            cancelled: Arc::new(CachePadded::new(AtomicBool::new(false))),
        }
    }

    /// Requests cancellation. All clones of this token observe the request.
    pub(crate) fn request(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears any pending cancellation request, so that a restarted worker
    /// doesn't observe a request aimed at a previous run.
    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns whether cancellation has been requested.
    ///
    /// This is the non-terminating observation: an operation that prefers to
    /// drain and return normally instead of being unwound can poll this and
    /// return early, which the activity then reports as a normal
    /// [`Finished`](crate::Completion::Finished) completion.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Observes any pending cancellation request, terminating the bound
    /// operation at this point if one is pending. Never blocks.
    ///
    /// Termination is delivered as a controlled unwind that the activity's
    /// worker harness catches and records as a
    /// [`Cancelled`](crate::Completion::Cancelled) completion. The unwind
    /// bypasses the process-wide panic hook: a delivered cancellation is a
    /// defined outcome, not a crash, so observers outside the crate see
    /// nothing. This only works with the default `panic = "unwind"`
    /// strategy; under `panic = "abort"` a delivered cancellation aborts
    /// the process.
    ///
    /// Must only be called from inside the bound operation, on the worker
    /// thread. Calling it anywhere else unwinds the calling thread when a
    /// request is pending.
    pub fn checkpoint(&self) {
        if self.is_cancelled() {
            std::panic::resume_unwind(Box::new(CancelUnwind));
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
