//! Error types for graph construction and runtime operations.
//!
//! Races inside the scheduler (a lost steal, an empty queue) are never errors;
//! they are retried internally. What remains are mistakes in how a graph or
//! frame program is put together, and failures to start worker threads.

use thiserror::Error;

use crate::frame::FrameRef;
use crate::frame::Slot;
use crate::unit::UnitId;

/// Errors produced by the runtime and its builders.
#[derive(Debug, Error)]
pub enum Error {
    /// A pool needs at least one worker.
    #[error("worker count must be at least one")]
    InvalidWorkerCount,
    /// An edge referred to a unit that is not in the graph.
    #[error("unit {0} does not exist")]
    UnknownUnit(UnitId),
    /// An edge pointed from a unit to itself.
    #[error("unit {0} cannot depend on itself")]
    SelfEdge(UnitId),
    /// The graph contains a cycle passing through the given unit.
    #[error("dependency cycle through unit {0}")]
    Cycle(UnitId),
    /// A frame was created waiting on more inputs than it has slots, so it
    /// could never become ready.
    #[error("a frame cannot wait on {0} inputs, more than it has slots")]
    TooManyInputs(usize),
    /// A write targeted a frame that is not waiting for inputs, either because
    /// it was never created or because it has already been made ready.
    #[error("frame {0} is not waiting for inputs")]
    UnknownFrame(FrameRef),
    /// A slot was written twice before its frame ran.
    #[error("slot {slot:?} of frame {frame} was already written")]
    SlotOverwritten {
        /// The frame being written.
        frame: FrameRef,
        /// The slot that was already filled.
        slot: Slot,
    },
    /// A frame ran without a value in a slot its behavior needs.
    #[error("frame is missing its {0:?} argument")]
    MissingArgument(Slot),
    /// The terminal continuation received more than one value.
    #[error("the terminal continuation was written twice")]
    TerminalWrittenTwice,
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// A worker thread exited abnormally.
    #[error("worker thread {0} panicked")]
    WorkerPanicked(usize),
    /// The pool's shared state was still referenced after every worker had
    /// been joined.
    #[error("worker threads still hold the pool after shutdown")]
    WorkersDetached,
    /// Work was submitted to a scheduler that is already running.
    #[error("scheduler is already running")]
    AlreadySubmitted,
    /// A scheduler was awaited without anything having been submitted.
    #[error("nothing has been submitted to the scheduler")]
    NotSubmitted,
}

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
