// Copyright 2025 The actlite authors
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![doc = include_str!("../README.md")]
#![forbid(missing_docs, unsafe_code)]

mod activity;
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
mod affinity;
mod callback;
mod cancel;
mod error;
mod macros;
mod runnable;
mod util;

pub use activity::{
    yield_now, Activity, ActivityState, Completion, DEFAULT_CORE_SCAN_LIMIT,
};
pub use callback::{Invoke, MethodBinding};
pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use runnable::{Runnable, RunnableHandle};
