// Copyright 2025 The actlite authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types.

/// A specialized [`Result`](std::result::Result) type for activity
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that activity operations can return.
///
/// OS-level failures (thread creation, affinity syscalls) are always
/// recovered into an error value; nothing in this crate aborts the process.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The activity is already running. Returned by
    /// [`start()`](crate::Activity::start) and
    /// [`start_pinned()`](crate::Activity::start_pinned) instead of spawning
    /// a second thread.
    #[error("activity is already running")]
    AlreadyRunning,

    /// The activity was never started. Returned by operations that need a
    /// live or previously live worker thread, such as
    /// [`stop()`](crate::Activity::stop) and [`join()`](crate::Activity::join).
    #[error("activity has not been started")]
    NotStarted,

    /// Creating the worker thread failed at the OS level. This is a
    /// resource-exhaustion class error: the activity is rolled back to its
    /// previous state and starting can be retried.
    #[error("failed to spawn the activity thread: {0}")]
    Spawn(std::io::Error),

    /// The given core identifier exceeds the capacity of the platform CPU
    /// set.
    #[error("invalid core identifier: {0}")]
    InvalidCore(usize),

    /// A `sched_getaffinity()`/`sched_setaffinity()` call failed.
    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    #[error("CPU affinity operation failed: {0}")]
    Affinity(nix::errno::Errno),

    /// CPU affinity is not supported (or not implemented) on this platform.
    #[error("CPU affinity is not supported on this platform")]
    AffinityUnsupported,
}
