//! This module defines the [`Unit`], the schedulable piece of work in a static
//! dependency graph, and the [`UnitContext`] handed to a unit's body.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::deque::Handle;
use crate::graph::Graph;
use crate::platform::*;

/// The value produced by a unit of work.
pub type Value = i64;

/// The body of a unit. It is called exactly once, with a context that can
/// read the results of the unit's inputs and write the unit's own result.
pub(crate) type Body = Box<dyn Fn(&mut UnitContext<'_>) + Send + Sync>;

// -----------------------------------------------------------------------------
// Unit ids

/// A stable handle to a unit within its [`Graph`]. Handles are plain indices
/// into the graph's arena; they never own the unit they refer to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(usize);

impl UnitId {
    pub(crate) const fn new(index: usize) -> UnitId {
        UnitId(index)
    }

    /// Returns the position of the unit in the graph's arena.
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Handle for UnitId {
    #[inline(always)]
    fn into_raw(self) -> usize {
        self.0
    }

    #[inline(always)]
    fn from_raw(raw: usize) -> UnitId {
        UnitId(raw)
    }
}

// -----------------------------------------------------------------------------
// Units

/// A unit of work in a static graph.
///
/// The topology (`dependents`, `inputs` and `in_degree`) is frozen when the
/// graph is built. During a run only two fields change: `pending`, which only
/// ever counts down, and `result`, which is written once by the unit's own
/// body.
pub(crate) struct Unit {
    /// The computation to run.
    body: Body,
    /// The unit's result. Written with relaxed ordering; it is published to
    /// dependents by the release half of their `pending` decrement.
    result: AtomicI64,
    /// Units to notify when this unit finishes (outgoing control edges).
    dependents: Vec<UnitId>,
    /// Units whose results this unit reads (incoming data edges).
    inputs: Vec<UnitId>,
    /// The number of predecessors that have not finished yet.
    pending: AtomicUsize,
    /// The number of predecessors in total, used to re-arm `pending`.
    in_degree: usize,
}

impl Unit {
    pub(crate) fn new(
        body: Body,
        dependents: Vec<UnitId>,
        inputs: Vec<UnitId>,
        in_degree: usize,
    ) -> Unit {
        Unit {
            body,
            result: AtomicI64::new(0),
            dependents,
            inputs,
            pending: AtomicUsize::new(in_degree),
            in_degree,
        }
    }

    #[inline(always)]
    pub(crate) fn dependents(&self) -> &[UnitId] {
        &self.dependents
    }

    #[inline(always)]
    pub(crate) fn inputs(&self) -> &[UnitId] {
        &self.inputs
    }

    #[inline(always)]
    pub(crate) fn in_degree(&self) -> usize {
        self.in_degree
    }

    /// Returns the number of unfinished predecessors.
    #[inline(always)]
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn result(&self) -> Value {
        self.result.load(Ordering::Relaxed)
    }

    /// Runs the unit's body.
    #[inline(always)]
    pub(crate) fn run(&self, cx: &mut UnitContext<'_>) {
        (self.body)(cx);
    }

    /// Records that one predecessor has finished. Returns true for exactly one
    /// call: the one that takes the counter to zero, making the unit ready.
    ///
    /// The decrement releases the finished predecessor's result and acquires
    /// those of every predecessor that finished before it, so whoever makes
    /// the unit ready sees all of its inputs.
    #[inline(always)]
    pub(crate) fn satisfy(&self) -> bool {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous != 0, "dependency counter underflow");
        previous == 1
    }

    /// Restores the unit to its freshly built state.
    pub(crate) fn reset(&mut self) {
        self.pending.store(self.in_degree, Ordering::Relaxed);
        self.result.store(0, Ordering::Relaxed);
    }
}

// -----------------------------------------------------------------------------
// Unit context

/// The handle a unit's body receives while it runs.
pub struct UnitContext<'g> {
    graph: &'g Graph,
    id: UnitId,
}

impl<'g> UnitContext<'g> {
    pub(crate) fn new(graph: &'g Graph, id: UnitId) -> UnitContext<'g> {
        UnitContext { graph, id }
    }

    /// Returns the id of the running unit.
    #[inline]
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Returns the number of data inputs the running unit declared.
    #[inline]
    pub fn num_inputs(&self) -> usize {
        self.graph.unit(self.id).inputs().len()
    }

    /// Returns the result of the `index`th data input, in the order the data
    /// edges were declared.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn input(&self, index: usize) -> Value {
        let input = self.graph.unit(self.id).inputs()[index];
        self.graph.unit(input).result()
    }

    /// Returns the results of all data inputs, in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = Value> + '_ {
        self.graph
            .unit(self.id)
            .inputs()
            .iter()
            .map(|&input| self.graph.unit(input).result())
    }

    /// Returns the running unit's current result.
    #[inline]
    pub fn result(&self) -> Value {
        self.graph.unit(self.id).result()
    }

    /// Sets the running unit's result.
    #[inline]
    pub fn set_result(&mut self, value: Value) {
        self.graph
            .unit(self.id)
            .result
            .store(value, Ordering::Relaxed);
    }
}

// -----------------------------------------------------------------------------
// Tests
