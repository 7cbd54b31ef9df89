//! This module contains the worker loops for both scheduling backends.
//!
//! Every worker runs the same state machine. It pops from its own queue while
//! it can (`Running`), falls back to stealing from its peers in a fixed
//! round-robin order when its queue is empty (`Stealing`), yields the core
//! when nobody has work, and exits once the pool is told to stop (`Stopped`).
//! Work is always executed on the thread that found it, and anything that work
//! makes ready is queued on that same thread. Work stays where it is produced.

use alloc::boxed::Box;
use core::hint;

use tracing::trace;
use tracing::trace_span;

use crate::completion::Completion;
use crate::deque::Deque;
use crate::deque::Handle;
use crate::deque::Steal;
use crate::error::Error;
use crate::frame::Behavior;
use crate::frame::FrameContext;
use crate::frame_queue::Frame;
use crate::frame_queue::FrameQueue;
use crate::graph::Graph;
use crate::platform::*;
use crate::unit::UnitContext;
use crate::unit::UnitId;
use crate::unit::Value;
use crate::unwind;

/// How many failed searches a worker spins through before yielding its core.
const SPINS_BEFORE_YIELD: u32 = 16;

// -----------------------------------------------------------------------------
// Work queues

/// A per-worker source of work that the owner pops from and peers steal from.
pub(crate) trait WorkQueue {
    /// The kind of work held in the queue.
    type Item;

    /// Takes work from the owner's end.
    fn pop_local(&self) -> Option<Self::Item>;

    /// Takes work from the thieves' end.
    fn steal_remote(&self) -> Steal<Self::Item>;
}

impl<T: Handle> WorkQueue for Deque<T> {
    type Item = T;

    #[inline(always)]
    fn pop_local(&self) -> Option<T> {
        self.pop()
    }

    #[inline(always)]
    fn steal_remote(&self) -> Steal<T> {
        self.steal()
    }
}

impl<B: Copy> WorkQueue for FrameQueue<B> {
    type Item = Frame<B>;

    #[inline(always)]
    fn pop_local(&self) -> Option<Frame<B>> {
        FrameQueue::pop_local(self)
    }

    #[inline(always)]
    fn steal_remote(&self) -> Steal<Frame<B>> {
        FrameQueue::steal_remote(self).into()
    }
}

// -----------------------------------------------------------------------------
// Worker state machine

/// What a worker is currently doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Executing work from its own queue.
    Running,
    /// Its own queue is empty and it is looking for work elsewhere.
    Stealing,
    /// The pool has been told to stop. This state is terminal.
    Stopped,
}

/// The scheduling half of a worker: its index and a view of every queue in
/// the pool.
pub(crate) struct Worker<'a, Q> {
    index: usize,
    queues: &'a [Q],
    state: WorkerState,
    idle_spins: u32,
}

impl<'a, Q: WorkQueue> Worker<'a, Q> {
    pub(crate) fn new(index: usize, queues: &'a [Q]) -> Worker<'a, Q> {
        Worker {
            index,
            queues,
            state: WorkerState::Running,
            idle_spins: 0,
        }
    }

    /// Returns the worker's own queue.
    #[inline(always)]
    pub(crate) fn local(&self) -> &'a Q {
        &self.queues[self.index]
    }

    #[inline(always)]
    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }

    /// Tries to find a job to execute, first in the local queue and then by
    /// stealing. Victims are tried once each, in order, starting with the
    /// worker after this one. A steal that loses a race moves on to the next
    /// victim instead of retrying.
    #[inline]
    pub(crate) fn find_work(&mut self) -> Option<Q::Item> {
        if let Some(item) = self.local().pop_local() {
            self.state = WorkerState::Running;
            return Some(item);
        }

        if self.state != WorkerState::Stealing {
            trace!(worker = self.index, "local queue empty, stealing");
            self.state = WorkerState::Stealing;
        }

        let len = self.queues.len();
        for offset in 1..len {
            let victim = (self.index + offset) % len;
            match self.queues[victim].steal_remote() {
                Steal::Success(item) => {
                    self.state = WorkerState::Running;
                    return Some(item);
                }
                Steal::Empty | Steal::Retry => {}
            }
        }

        None
    }

    /// Backs off after a search found nothing. Workers never sleep; they spin
    /// briefly and then yield the core to the OS.
    #[inline]
    pub(crate) fn idle(&mut self) {
        self.idle_spins += 1;
        if self.idle_spins % SPINS_BEFORE_YIELD == 0 {
            yield_now();
        } else {
            hint::spin_loop();
        }
    }

    fn stop(&mut self) {
        self.state = WorkerState::Stopped;
    }
}

// -----------------------------------------------------------------------------
// DAG backend

/// Everything the workers of a DAG run share.
pub(crate) struct DagShared {
    pub(crate) graph: Graph,
    pub(crate) queues: Box<[Deque<UnitId>]>,
    pub(crate) completion: Completion,
}

/// This is the main loop for a DAG worker thread.
pub(crate) fn dag_worker(shared: &DagShared, index: usize) {
    let span = trace_span!("worker", index);
    let _enter = span.enter();
    trace!("starting dag worker");

    let mut worker = Worker::new(index, &shared.queues);
    while !shared.completion.should_stop() {
        match worker.find_work() {
            Some(id) => execute_unit(shared, worker.local(), id),
            None => worker.idle(),
        }
    }
    worker.stop();

    trace!(state = ?worker.state(), "exiting dag worker");
}

/// Runs a unit, then resolves its dependents. Any dependent whose last
/// predecessor this was is queued on the executing worker's deque.
///
/// A panic anywhere in here would leave the unit counted forever, so the
/// whole step runs under the abort guard.
#[inline]
fn execute_unit(shared: &DagShared, local: &Deque<UnitId>, id: UnitId) {
    unwind::abort_on_panic(|| {
        let unit = shared.graph.unit(id);
        let mut cx = UnitContext::new(&shared.graph, id);
        unit.run(&mut cx);

        for &dependent in unit.dependents() {
            if shared.graph.unit(dependent).satisfy() {
                shared.completion.add(1);
                local.push(dependent);
            }
        }

        shared.completion.complete_one();
    });
}

// -----------------------------------------------------------------------------
// Frame backend

/// Everything the workers of a frame run share.
pub(crate) struct FrameShared<B> {
    pub(crate) queues: Box<[FrameQueue<B>]>,
    pub(crate) completion: Completion,
    /// The value delivered to the terminal continuation.
    pub(crate) terminal: Mutex<Option<Value>>,
    /// The first error raised by a frame, if any.
    pub(crate) failure: Mutex<Option<Error>>,
}

impl<B: Behavior> FrameShared<B> {
    /// Creates the shared state for a run. The outstanding count starts at
    /// one, for the root frame the caller is about to spawn.
    pub(crate) fn new(workers: usize) -> FrameShared<B> {
        FrameShared {
            queues: (0..workers).map(FrameQueue::new).collect(),
            completion: Completion::new(1),
            terminal: Mutex::new(None),
            failure: Mutex::new(None),
        }
    }

    /// Records a failure and shuts the run down. Only the first failure is
    /// kept.
    #[cold]
    fn fail(&self, error: Error) {
        tracing::error!(%error, "frame failed");
        let mut failure = lock(&self.failure);
        if failure.is_none() {
            *failure = Some(error);
        }
        drop(failure);
        self.completion.abort();
    }
}

/// This is the main loop for a frame worker thread.
pub(crate) fn frame_worker<B: Behavior>(shared: &FrameShared<B>, index: usize) {
    let span = trace_span!("worker", index);
    let _enter = span.enter();
    trace!("starting frame worker");

    let mut worker = Worker::new(index, &shared.queues);
    while !shared.completion.should_stop() {
        match worker.find_work() {
            Some(frame) => execute_frame(shared, index, frame),
            None => worker.idle(),
        }
    }
    worker.stop();

    trace!(state = ?worker.state(), "exiting frame worker");
}

/// Runs a frame. The frame is consumed here; anything it creates is owned by
/// the executing worker.
#[inline]
fn execute_frame<B: Behavior>(shared: &FrameShared<B>, index: usize, frame: Frame<B>) {
    let cx = FrameContext::new(shared, index);
    unwind::abort_on_panic(|| {
        if let Err(error) = frame.tag().invoke(frame.args(), &cx) {
            shared.fail(error);
        }
        shared.completion.complete_one();
    });
}

// -----------------------------------------------------------------------------
// Tests
