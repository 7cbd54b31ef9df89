//! A work-stealing runtime for fork-join dependency graphs.
//!
//! Drover executes a graph of small computations on a fixed pool of worker
//! threads. Every unit of work runs exactly once, and only after each of its
//! predecessors has finished and published its result. Idle workers keep
//! themselves busy by stealing from their peers, and the pool knows it is done
//! when a single outstanding-work counter drops to zero.
//!
//! Two scheduling backends sit behind the same [`Scheduler`] interface:
//!
//! * The **DAG backend** runs a [`Graph`] whose topology is fixed before
//!   execution starts. Each worker owns a lock-free Chase-Lev [`Deque`] of
//!   unit handles. Completing a unit decrements the pending counters of its
//!   dependents, and the worker that lands a counter on zero queues the
//!   dependent on its own deque.
//!
//! * The **frame backend** grows the graph lazily. Running frames create new
//!   frames and fill their argument slots; a frame becomes runnable once all
//!   of its slots are written. Each worker guards its frame table and ready
//!   queue with a single mutex, and writes to a frame are always routed
//!   through the mutex of the worker that allocated it.
//!
//! ```
//! # #![cfg(not(loom))]
//! use drover::{Config, Runtime, fib::Fibonacci};
//!
//! let runtime = Runtime::new(Config::new(4)).unwrap();
//! let report = runtime.run(&Fibonacci(10)).unwrap();
//! assert_eq!(report.output, Some(55));
//! ```

#![no_std]

// -----------------------------------------------------------------------------
// Boilerplate for building without the standard library

extern crate alloc;
extern crate std;

// -----------------------------------------------------------------------------
// Modules

mod affinity;
mod completion;
mod deque;
mod error;
pub mod fib;
mod frame;
mod frame_queue;
mod graph;
mod runtime;
mod unit;
mod unwind;
mod worker;

// -----------------------------------------------------------------------------
// Top-level exports

pub use completion::Completion;
pub use completion::WaitStrategy;
pub use deque::Deque;
pub use deque::Handle;
pub use deque::Steal;
pub use error::Error;
pub use error::Result;
pub use frame::ArgValue;
pub use frame::Behavior;
pub use frame::Continuation;
pub use frame::FrameArgs;
pub use frame::FrameContext;
pub use frame::FrameRef;
pub use frame::SLOT_COUNT;
pub use frame::Slot;
pub use frame::Target;
pub use frame_queue::Frame;
pub use frame_queue::FrameQueue;
pub use graph::Graph;
pub use graph::GraphBuilder;
pub use runtime::BackendKind;
pub use runtime::Config;
pub use runtime::DagScheduler;
pub use runtime::FrameScheduler;
pub use runtime::RunReport;
pub use runtime::Runtime;
pub use runtime::Scheduler;
pub use runtime::Workload;
pub use unit::UnitContext;
pub use unit::UnitId;
pub use unit::Value;
pub use worker::WorkerState;

// -----------------------------------------------------------------------------
// Platform Support

// This crate uses `loom` for testing, which requires mocking all of the core
// threading primitives (`Mutex` and the like).
//
// To make things a bit simpler, we re-export all the important types in the
// `platform` module.

#[cfg(not(loom))]
mod platform {

    // Core exports

    pub use core::sync::atomic::AtomicBool;
    pub use core::sync::atomic::AtomicI64;
    pub use core::sync::atomic::AtomicPtr;
    pub use core::sync::atomic::AtomicUsize;
    pub use core::sync::atomic::Ordering;
    pub use core::sync::atomic::fence;
    pub use std::sync::Mutex;
    pub use std::sync::MutexGuard;
    pub use std::thread::yield_now;

    /// Locks a mutex, ignoring poison. Unit bodies abort instead of unwinding,
    /// so a poisoned lock can only come from a bug inside the runtime itself.
    pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(loom)]
mod platform {

    // Core exports

    pub use loom::sync::Mutex;
    pub use loom::sync::MutexGuard;
    pub use loom::sync::atomic::AtomicBool;
    pub use loom::sync::atomic::AtomicI64;
    pub use loom::sync::atomic::AtomicPtr;
    pub use loom::sync::atomic::AtomicUsize;
    pub use loom::sync::atomic::Ordering;
    pub use loom::sync::atomic::fence;
    pub use loom::thread::yield_now;

    /// Locks a mutex, ignoring poison.
    pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
