// Copyright 2025 The actlite authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CPU affinity glue over `sched_getaffinity()`/`sched_setaffinity()`.
//!
//! This module is only compiled on platforms that support
//! `libc::sched_setaffinity()`. Applying a mask to the calling thread works
//! on all of them; targeting another thread of the same process additionally
//! requires a per-thread id from `gettid()`, which narrows the supported
//! list to Linux and Android.

use crate::error::{Error, Result};
use nix::sched::{sched_setaffinity, CpuSet};
use nix::unistd::Pid;
use std::collections::BTreeSet;

#[cfg(any(target_os = "android", target_os = "linux"))]
use nix::sched::sched_getaffinity;

/// Number of core identifiers a platform CPU set can hold. Core ids at or
/// beyond this bound are invalid.
pub fn capacity() -> usize {
    CpuSet::count()
}

/// Builds an OS CPU set from the given core identifiers. An empty input
/// produces a fully populated set, i.e. "no constraint, OS default
/// placement".
fn build_cpu_set(cores: &BTreeSet<usize>) -> Result<CpuSet> {
    let mut cpu_set = CpuSet::new();
    if cores.is_empty() {
        for core in 0..CpuSet::count() {
            cpu_set.set(core).map_err(Error::Affinity)?;
        }
    } else {
        for &core in cores {
            cpu_set.set(core).map_err(|_| Error::InvalidCore(core))?;
        }
    }
    Ok(cpu_set)
}

/// Constrains the calling thread to the given cores.
pub fn pin_current(cores: &BTreeSet<usize>) -> Result<()> {
    let cpu_set = build_cpu_set(cores)?;
    sched_setaffinity(Pid::from_raw(0), &cpu_set).map_err(Error::Affinity)
}

/// Returns the id of the calling thread, usable as a target for
/// [`set_for()`] and [`query_for()`] from any thread of the process.
#[cfg(any(target_os = "android", target_os = "linux"))]
pub fn current_thread_id() -> Pid {
    nix::unistd::gettid()
}

/// Replaces the affinity mask of the thread with the given id. An empty
/// core set removes any constraint by applying a fully populated mask.
#[cfg(any(target_os = "android", target_os = "linux"))]
pub fn set_for(tid: Pid, cores: &BTreeSet<usize>) -> Result<()> {
    let cpu_set = build_cpu_set(cores)?;
    sched_setaffinity(tid, &cpu_set).map_err(Error::Affinity)
}

/// Re-derives the core set of the thread with the given id from the
/// OS-reported mask, scanning core identifiers in `0..scan_limit`.
#[cfg(any(target_os = "android", target_os = "linux"))]
pub fn query_for(tid: Pid, scan_limit: usize) -> Result<BTreeSet<usize>> {
    let cpu_set = sched_getaffinity(tid).map_err(Error::Affinity)?;
    let mut cores = BTreeSet::new();
    for core in 0..scan_limit.min(CpuSet::count()) {
        if cpu_set.is_set(core).unwrap_or(false) {
            cores.insert(core);
        }
    }
    Ok(cores)
}

#[cfg(all(test, any(target_os = "android", target_os = "linux")))]
mod test {
    use super::*;

    #[test]
    fn query_own_thread_reports_at_least_one_core() {
        let tid = current_thread_id();
        let cores = query_for(tid, capacity()).unwrap();
        assert!(!cores.is_empty());
    }

    #[test]
    fn set_and_query_roundtrip_on_own_thread() {
        let tid = current_thread_id();
        let original = query_for(tid, capacity()).unwrap();

        set_for(tid, &BTreeSet::from([0])).unwrap();
        assert_eq!(query_for(tid, capacity()).unwrap(), BTreeSet::from([0]));

        // Restore the original mask so this test thread isn't left pinned.
        set_for(tid, &original).unwrap();
    }

    #[test]
    fn out_of_range_core_is_rejected() {
        let tid = current_thread_id();
        let result = set_for(tid, &BTreeSet::from([100_000]));
        assert!(matches!(result, Err(Error::InvalidCore(100_000))));
    }

    #[test]
    fn empty_set_means_unconstrained() {
        let tid = current_thread_id();
        let original = query_for(tid, capacity()).unwrap();

        set_for(tid, &BTreeSet::new()).unwrap();
        let cores = query_for(tid, capacity()).unwrap();
        assert!(cores.len() >= original.len());

        set_for(tid, &original).unwrap();
    }
}
