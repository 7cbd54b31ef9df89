//! Panic containment for unit and frame bodies.
//!
//! A body that unwinds would leave its unit counted as outstanding forever,
//! and every thread waiting on the pool would hang. Bodies are therefore run
//! under a guard that turns a panic into an abort.

use core::mem;
use std::process::abort;

/// Aborts the program when dropped.
pub struct AbortOnDrop;

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        tracing::error!("unit of work panicked; aborting");
        std::eprintln!("drover: detected unexpected panic; aborting");
        abort();
    }
}

/// Calls `f`, aborting the process if it panics.
#[inline(always)]
pub fn abort_on_panic<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let guard = AbortOnDrop;
    let result = f();
    mem::forget(guard);
    result
}
