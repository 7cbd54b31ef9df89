//! Frames are the units of work in the dynamic scheduling backend.
//!
//! A frame is a tagged bundle of argument slots. Frames are created while the
//! computation runs, and a frame becomes runnable once every slot it waits on
//! has been written. Running a frame dispatches on its tag with a plain
//! `match`, through the [`Behavior`] trait.
//!
//! Frames are addressed by [`FrameRef`], which names the worker that created
//! the frame and a sequence number local to that worker. All writes to a
//! frame's slots go through its owner's queue, under the owner's lock, no
//! matter which worker performs them.

use core::fmt;

use crate::error::Error;
use crate::error::Result;
use crate::platform::*;
use crate::unit::Value;
use crate::worker::FrameShared;

// -----------------------------------------------------------------------------
// Frame references

/// A handle to a frame, valid while the frame is waiting for inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameRef {
    owner: usize,
    id: u64,
}

impl FrameRef {
    pub(crate) const fn new(owner: usize, id: u64) -> FrameRef {
        FrameRef { owner, id }
    }

    /// Returns the index of the worker that owns this frame.
    #[inline(always)]
    pub const fn owner(self) -> usize {
        self.owner
    }

    /// Returns the frame's sequence number within its owner.
    #[inline(always)]
    pub const fn id(self) -> u64 {
        self.id
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.owner, self.id)
    }
}

// -----------------------------------------------------------------------------
// Slots

/// The number of argument slots in every frame.
pub const SLOT_COUNT: usize = 4;

/// Names the argument slots of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Slot {
    /// The first operand.
    Left = 0,
    /// Where the frame sends its result.
    Continuation = 1,
    /// The second operand.
    Right = 2,
    /// Which slot of the continuation receives the result.
    ReturnSlot = 3,
}

impl Slot {
    /// Every slot, in index order.
    pub const ALL: [Slot; SLOT_COUNT] = [
        Slot::Left,
        Slot::Continuation,
        Slot::Right,
        Slot::ReturnSlot,
    ];

    /// Returns the slot's position in the frame.
    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Where a result is delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Target {
    /// A slot of another frame.
    Frame(FrameRef),
    /// The runtime's terminal sentinel. A value written here is the result of
    /// the whole computation.
    Terminal,
}

/// A target frame together with the slot that should receive a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Continuation {
    /// The frame (or sentinel) to deliver to.
    pub target: Target,
    /// The slot to fill.
    pub slot: Slot,
}

/// A value stored in a frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgValue {
    /// A plain operand.
    Value(Value),
    /// A continuation target.
    Target(Target),
    /// A slot index, naming which slot of a continuation to fill.
    Slot(Slot),
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> ArgValue {
        ArgValue::Value(value)
    }
}

impl From<Target> for ArgValue {
    fn from(target: Target) -> ArgValue {
        ArgValue::Target(target)
    }
}

impl From<FrameRef> for ArgValue {
    fn from(frame: FrameRef) -> ArgValue {
        ArgValue::Target(Target::Frame(frame))
    }
}

impl From<Slot> for ArgValue {
    fn from(slot: Slot) -> ArgValue {
        ArgValue::Slot(slot)
    }
}

// -----------------------------------------------------------------------------
// Frame arguments

/// The argument slots of a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameArgs {
    slots: [Option<ArgValue>; SLOT_COUNT],
}

impl FrameArgs {
    /// Creates a set of empty slots.
    pub const fn new() -> FrameArgs {
        FrameArgs {
            slots: [None; SLOT_COUNT],
        }
    }

    /// Returns these arguments with `slot` set to `value`.
    #[must_use]
    pub fn with(mut self, slot: Slot, value: impl Into<ArgValue>) -> FrameArgs {
        self.slots[slot.index()] = Some(value.into());
        self
    }

    /// Returns the contents of a slot.
    #[inline]
    pub fn get(&self, slot: Slot) -> Option<ArgValue> {
        self.slots[slot.index()]
    }

    /// Returns the operand in `slot`, if it holds one.
    #[inline]
    pub fn value(&self, slot: Slot) -> Option<Value> {
        match self.get(slot) {
            Some(ArgValue::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Assembles the continuation from the `Continuation` and `ReturnSlot`
    /// slots. The return slot defaults to [`Slot::Left`].
    pub fn continuation(&self) -> Option<Continuation> {
        let Some(ArgValue::Target(target)) = self.get(Slot::Continuation) else {
            return None;
        };
        let slot = match self.get(Slot::ReturnSlot) {
            Some(ArgValue::Slot(slot)) => slot,
            _ => Slot::Left,
        };
        Some(Continuation { target, slot })
    }

    /// Fills an empty slot. Returns false if the slot was already written.
    pub(crate) fn fill(&mut self, slot: Slot, value: ArgValue) -> bool {
        let entry = &mut self.slots[slot.index()];
        if entry.is_some() {
            return false;
        }
        *entry = Some(value);
        true
    }
}

// -----------------------------------------------------------------------------
// Behaviors

/// The closed set of things a frame can do, usually a fieldless enum. The
/// runtime calls [`Behavior::invoke`] once for every frame that becomes ready.
///
/// Invocations must not block. They may create frames, spawn ready frames and
/// write to the slots of any frame they hold a reference to.
pub trait Behavior: Copy + Send + Sync + fmt::Debug + 'static {
    /// Runs a ready frame tagged with `self`.
    ///
    /// # Errors
    ///
    /// Returning an error stops the pool; the error is reported by
    /// [`Scheduler::await_completion`](crate::Scheduler::await_completion).
    fn invoke(self, args: &FrameArgs, cx: &FrameContext<'_, Self>) -> Result<()>;
}

// -----------------------------------------------------------------------------
// Frame context

/// The handle a running frame uses to create and feed other frames.
pub struct FrameContext<'a, B> {
    shared: &'a FrameShared<B>,
    worker: usize,
}

impl<'a, B: Behavior> FrameContext<'a, B> {
    pub(crate) fn new(shared: &'a FrameShared<B>, worker: usize) -> FrameContext<'a, B> {
        FrameContext { shared, worker }
    }

    /// Returns the index of the worker running this frame.
    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Creates a frame owned by this worker that runs once `inputs` slots have
    /// been written. A frame with no inputs is ready immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyInputs`] if `inputs` exceeds [`SLOT_COUNT`].
    pub fn create_frame(&self, tag: B, inputs: usize) -> Result<FrameRef> {
        if inputs > SLOT_COUNT {
            return Err(Error::TooManyInputs(inputs));
        }
        self.shared.completion.add(1);
        self.shared.queues[self.worker].create_frame(tag, inputs)
    }

    /// Creates a frame with all of its arguments already known, ready to run.
    pub fn spawn(&self, tag: B, args: FrameArgs) -> FrameRef {
        self.shared.completion.add(1);
        self.shared.queues[self.worker].spawn(tag, args)
    }

    /// Writes one slot of a waiting frame. The write is applied under the
    /// owning worker's lock, wherever the frame lives.
    ///
    /// # Errors
    ///
    /// Fails if the frame is not waiting for inputs, or if the slot has
    /// already been written.
    pub fn write(&self, frame: FrameRef, slot: Slot, value: impl Into<ArgValue>) -> Result<()> {
        let owner = self
            .shared
            .queues
            .get(frame.owner())
            .ok_or(Error::UnknownFrame(frame))?;
        if frame.owner() != self.worker {
            tracing::trace!(%frame, from = self.worker, "routing write to owner");
        }
        owner.write_slot(frame, slot, value.into()).map(|_| ())
    }

    /// Delivers a value to a continuation, which is either a waiting frame or
    /// the terminal sentinel.
    ///
    /// # Errors
    ///
    /// See [`FrameContext::write`]. Writing the terminal sentinel twice is
    /// also an error.
    pub fn resolve(&self, continuation: Continuation, value: Value) -> Result<()> {
        match continuation.target {
            Target::Frame(frame) => self.write(frame, continuation.slot, value),
            Target::Terminal => {
                let mut terminal = lock(&self.shared.terminal);
                if terminal.is_some() {
                    return Err(Error::TerminalWrittenTwice);
                }
                tracing::debug!(value, "terminal continuation reached");
                *terminal = Some(value);
                Ok(())
            }
        }
    }
}
