//! A Fibonacci workload, computed by recursive fork-join decomposition.
//!
//! This is the canonical test and benchmark graph for both backends. It has a
//! lot of very small units, deep chains of dependencies, and wide fan-out near
//! the leaves, which makes it a good stress test for stealing.

use alloc::vec::Vec;

use crate::error::Error;
use crate::error::Result;
use crate::frame::Behavior;
use crate::frame::FrameArgs;
use crate::frame::FrameContext;
use crate::frame::SLOT_COUNT;
use crate::frame::Slot;
use crate::frame::Target;
use crate::graph::Graph;
use crate::graph::GraphBuilder;
use crate::runtime::Workload;
use crate::unit::UnitId;
use crate::unit::Value;

/// Computes the `n`th Fibonacci number on a [`Runtime`](crate::Runtime).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fibonacci(pub u32);

impl Workload for Fibonacci {
    type Behavior = FibTask;

    fn graph(&self) -> Result<(Graph, UnitId)> {
        let mut builder = GraphBuilder::new();
        let (_, sink) = build(&mut builder, self.0)?;
        Ok((builder.build()?, sink))
    }

    fn root_frame(&self) -> (FibTask, FrameArgs) {
        let args = FrameArgs::new()
            .with(Slot::Left, Value::from(self.0))
            .with(Slot::Continuation, Target::Terminal);
        (FibTask::Spawn, args)
    }
}

// -----------------------------------------------------------------------------
// Static graph

/// Adds the units for `fib(n)` and returns the first and last of them.
///
/// For `n < 2` this is a single leaf that produces `n`. Otherwise it is a
/// spawn unit, which must run before either sub-problem starts, and a sync
/// unit, which sums the results of both sub-problems.
fn build(builder: &mut GraphBuilder, n: u32) -> Result<(UnitId, UnitId)> {
    if n < 2 {
        let leaf = builder.add_unit(move |cx| cx.set_result(Value::from(n)));
        return Ok((leaf, leaf));
    }

    let spawn = builder.add_unit(|_| {});
    let sync = builder.add_unit(|cx| {
        let sum = cx.inputs().sum();
        cx.set_result(sum);
    });

    let (left_first, left_last) = build(builder, n - 1)?;
    let (right_first, right_last) = build(builder, n - 2)?;

    builder.add_data_edge(left_last, sync)?;
    builder.add_data_edge(right_last, sync)?;
    builder.add_edge(spawn, left_first)?;
    builder.add_edge(spawn, right_first)?;

    Ok((spawn, sync))
}

// -----------------------------------------------------------------------------
// Frame program

/// The behaviors of the Fibonacci frame program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FibTask {
    /// Splits `n` (in [`Slot::Left`]) into two sub-problems, or delivers it
    /// directly when it is a base case.
    Spawn,
    /// Adds the results in [`Slot::Left`] and [`Slot::Right`] and delivers the
    /// sum.
    Sync,
}

impl Behavior for FibTask {
    fn invoke(self, args: &FrameArgs, cx: &FrameContext<'_, FibTask>) -> Result<()> {
        let continuation = args
            .continuation()
            .ok_or(Error::MissingArgument(Slot::Continuation))?;
        let left = args
            .value(Slot::Left)
            .ok_or(Error::MissingArgument(Slot::Left))?;

        match self {
            FibTask::Spawn if left < 2 => cx.resolve(continuation, left),
            FibTask::Spawn => {
                // The sync frame waits on all four of its slots. Two are
                // filled here, and one by each child.
                let sync = cx.create_frame(FibTask::Sync, SLOT_COUNT)?;
                cx.write(sync, Slot::Continuation, continuation.target)?;
                cx.write(sync, Slot::ReturnSlot, continuation.slot)?;

                for (n, slot) in [(left - 1, Slot::Left), (left - 2, Slot::Right)] {
                    let child = FrameArgs::new()
                        .with(Slot::Left, n)
                        .with(Slot::Continuation, sync)
                        .with(Slot::ReturnSlot, slot);
                    cx.spawn(FibTask::Spawn, child);
                }
                Ok(())
            }
            FibTask::Sync => {
                let right = args
                    .value(Slot::Right)
                    .ok_or(Error::MissingArgument(Slot::Right))?;
                cx.resolve(continuation, left + right)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Reference implementation

/// Computes `fib(n)` on the calling thread.
pub fn sequential(n: u32) -> Value {
    let (mut a, mut b): (Value, Value) = (0, 1);
    for _ in 0..n {
        (a, b) = (b, a + b);
    }
    a
}

/// Returns the number of units in the static graph for `fib(n)`.
pub fn graph_size(n: u32) -> usize {
    let mut sizes: Vec<usize> = Vec::with_capacity(n as usize + 1);
    for i in 0..=n as usize {
        let size = if i < 2 { 1 } else { 2 + sizes[i - 1] + sizes[i - 2] };
        sizes.push(size);
    }
    sizes[n as usize]
}

// -----------------------------------------------------------------------------
// Tests
