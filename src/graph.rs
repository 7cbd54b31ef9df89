//! The arena that owns every unit of a static dependency graph, and the
//! builder used to assemble one.
//!
//! Edges are stored as [`UnitId`] indices rather than references, so the arena
//! is the single owner of every unit and nothing can dangle. Once built, a
//! graph's topology never changes; running it only counts down dependency
//! counters and fills in results.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use tracing::debug;

use crate::error::Error;
use crate::error::Result;
use crate::unit::Body;
use crate::unit::Unit;
use crate::unit::UnitContext;
use crate::unit::UnitId;
use crate::unit::Value;

// -----------------------------------------------------------------------------
// Builder

struct UnitDraft {
    body: Body,
    dependents: Vec<UnitId>,
    inputs: Vec<UnitId>,
    in_degree: usize,
}

/// Assembles a [`Graph`].
///
/// ```
/// # #![cfg(not(loom))]
/// use drover::GraphBuilder;
///
/// let mut builder = GraphBuilder::new();
/// let a = builder.add_unit(|cx| cx.set_result(20));
/// let b = builder.add_unit(|cx| cx.set_result(22));
/// let sum = builder.add_unit(|cx| {
///     let total = cx.inputs().sum();
///     cx.set_result(total);
/// });
/// builder.add_data_edge(a, sum).unwrap();
/// builder.add_data_edge(b, sum).unwrap();
/// let graph = builder.build().unwrap();
/// assert_eq!(graph.roots(), &[a, b]);
/// ```
#[derive(Default)]
pub struct GraphBuilder {
    units: Vec<UnitDraft>,
}

impl GraphBuilder {
    /// Creates an empty builder.
    pub fn new() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Creates an empty builder with room for `capacity` units.
    pub fn with_capacity(capacity: usize) -> GraphBuilder {
        GraphBuilder {
            units: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of units added so far.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if no units have been added.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Adds a unit with the given body and returns its id.
    pub fn add_unit<F>(&mut self, body: F) -> UnitId
    where
        F: Fn(&mut UnitContext<'_>) + Send + Sync + 'static,
    {
        let id = UnitId::new(self.units.len());
        self.units.push(UnitDraft {
            body: Box::new(body),
            dependents: Vec::new(),
            inputs: Vec::new(),
            in_degree: 0,
        });
        id
    }

    /// Adds a control edge: `to` may not start until `from` has finished.
    pub fn add_edge(&mut self, from: UnitId, to: UnitId) -> Result<()> {
        self.check_edge(from, to)?;
        self.units[from.index()].dependents.push(to);
        self.units[to.index()].in_degree += 1;
        Ok(())
    }

    /// Adds a data edge: `to` may not start until `from` has finished, and
    /// `from`'s result becomes the next of `to`'s inputs.
    pub fn add_data_edge(&mut self, from: UnitId, to: UnitId) -> Result<()> {
        self.add_edge(from, to)?;
        self.units[to.index()].inputs.push(from);
        Ok(())
    }

    fn check_edge(&self, from: UnitId, to: UnitId) -> Result<()> {
        for id in [from, to] {
            if id.index() >= self.units.len() {
                return Err(Error::UnknownUnit(id));
            }
        }
        if from == to {
            return Err(Error::SelfEdge(from));
        }
        Ok(())
    }

    /// Freezes the topology into a [`Graph`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cycle`] if the edges do not form a DAG. A cyclic graph
    /// could never finish, since the units on the cycle never become ready.
    pub fn build(self) -> Result<Graph> {
        if let Some(unit) = find_cycle(&self.units) {
            return Err(Error::Cycle(unit));
        }

        let units: Vec<Unit> = self
            .units
            .into_iter()
            .map(|draft| Unit::new(draft.body, draft.dependents, draft.inputs, draft.in_degree))
            .collect();

        let roots = units
            .iter()
            .enumerate()
            .filter(|(_, unit)| unit.in_degree() == 0)
            .map(|(index, _)| UnitId::new(index))
            .collect();

        debug!(units = units.len(), "built graph");

        Ok(Graph { units, roots })
    }
}

/// Runs Kahn's algorithm over the drafts. Returns some unit that can never
/// become ready if there is a cycle.
fn find_cycle(units: &[UnitDraft]) -> Option<UnitId> {
    let mut in_degree: Vec<usize> = units.iter().map(|draft| draft.in_degree).collect();
    let mut ready: VecDeque<usize> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(index, _)| index)
        .collect();

    let mut visited = 0;
    while let Some(index) = ready.pop_front() {
        visited += 1;
        for dependent in &units[index].dependents {
            let degree = &mut in_degree[dependent.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push_back(dependent.index());
            }
        }
    }

    if visited == units.len() {
        return None;
    }

    in_degree
        .iter()
        .position(|&degree| degree != 0)
        .map(UnitId::new)
}

// -----------------------------------------------------------------------------
// Graph

/// An immutable dependency graph of units, ready to run.
pub struct Graph {
    units: Vec<Unit>,
    roots: Vec<UnitId>,
}

impl Graph {
    /// Returns the number of units in the graph.
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if the graph has no units.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Returns the units that have no predecessors. These are the units a run
    /// starts from.
    pub fn roots(&self) -> &[UnitId] {
        &self.roots
    }

    /// Returns the result of a unit. Before the unit has run, this is zero.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn result(&self, id: UnitId) -> Value {
        self.unit(id).result()
    }

    /// Returns the number of predecessors of `id` that have not finished.
    /// After a complete run this is zero for every unit.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn pending(&self, id: UnitId) -> usize {
        self.unit(id).pending()
    }

    /// Returns the ids of the units `id` notifies when it finishes.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn dependents(&self, id: UnitId) -> &[UnitId] {
        self.unit(id).dependents()
    }

    /// Returns the ids of the units whose results `id` reads.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this graph.
    pub fn inputs(&self, id: UnitId) -> &[UnitId] {
        self.unit(id).inputs()
    }

    /// Re-arms every dependency counter and clears every result, so the same
    /// graph can be run again.
    pub fn reset(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
    }

    #[inline(always)]
    pub(crate) fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id.index()]
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("units", &self.units.len())
            .field("roots", &self.roots)
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tests
