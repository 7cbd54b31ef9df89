//! A per-worker queue of frames, guarded by a single mutex.
//!
//! The queue holds two things: a table of frames still waiting for inputs,
//! keyed by sequence number and paired with a count of missing inputs, and a
//! double-ended queue of frames that are ready to run. One lock covers both,
//! so filling the last slot of a frame and queueing it happen atomically; a
//! frame can be neither lost nor queued twice.
//!
//! Frames are stored by value. Making a frame ready moves it out of the table,
//! and running it moves it out of the ready queue, so there is never a second
//! owner left pointing at a consumed frame. A write that arrives too late
//! finds nothing in the table and reports an error.

use alloc::collections::VecDeque;

use crossbeam_utils::CachePadded;
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::error::Result;
use crate::frame::ArgValue;
use crate::frame::FrameArgs;
use crate::frame::FrameRef;
use crate::frame::SLOT_COUNT;
use crate::frame::Slot;
use crate::platform::*;

// -----------------------------------------------------------------------------
// Frames

/// A frame: a behavior tag together with its argument slots.
#[derive(Debug)]
pub struct Frame<B> {
    reference: FrameRef,
    tag: B,
    args: FrameArgs,
}

impl<B: Copy> Frame<B> {
    /// Returns the handle this frame was created under.
    pub fn reference(&self) -> FrameRef {
        self.reference
    }

    /// Returns the frame's behavior tag.
    pub fn tag(&self) -> B {
        self.tag
    }

    /// Returns the frame's arguments.
    pub fn args(&self) -> &FrameArgs {
        &self.args
    }
}

struct Waiting<B> {
    frame: Frame<B>,
    remaining: usize,
}

struct FrameTable<B> {
    next_id: u64,
    waiting: FxHashMap<u64, Waiting<B>>,
    ready: VecDeque<Frame<B>>,
}

impl<B> FrameTable<B> {
    fn allocate(&mut self, owner: usize) -> FrameRef {
        let id = self.next_id;
        self.next_id += 1;
        FrameRef::new(owner, id)
    }
}

// -----------------------------------------------------------------------------
// Frame queue

/// The frame table and ready queue owned by one worker.
pub struct FrameQueue<B> {
    owner: usize,
    table: CachePadded<Mutex<FrameTable<B>>>,
}

impl<B: Copy> FrameQueue<B> {
    /// Creates an empty queue for the given worker.
    pub fn new(owner: usize) -> FrameQueue<B> {
        FrameQueue {
            owner,
            table: CachePadded::new(Mutex::new(FrameTable {
                next_id: 0,
                waiting: FxHashMap::default(),
                ready: VecDeque::new(),
            })),
        }
    }

    /// Returns the index of the worker that owns this queue.
    pub fn owner(&self) -> usize {
        self.owner
    }

    /// Creates a frame that becomes ready after `inputs` slot writes. With
    /// zero inputs, the frame goes straight to the ready queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyInputs`] if `inputs` exceeds [`SLOT_COUNT`].
    pub fn create_frame(&self, tag: B, inputs: usize) -> Result<FrameRef> {
        if inputs > SLOT_COUNT {
            return Err(Error::TooManyInputs(inputs));
        }

        let mut table = lock(&self.table);
        let reference = table.allocate(self.owner);
        let frame = Frame {
            reference,
            tag,
            args: FrameArgs::new(),
        };
        if inputs == 0 {
            table.ready.push_back(frame);
        } else {
            table.waiting.insert(
                reference.id(),
                Waiting {
                    frame,
                    remaining: inputs,
                },
            );
        }
        Ok(reference)
    }

    /// Creates a ready frame with its arguments already filled in.
    pub fn spawn(&self, tag: B, args: FrameArgs) -> FrameRef {
        let mut table = lock(&self.table);
        let reference = table.allocate(self.owner);
        table.ready.push_back(Frame {
            reference,
            tag,
            args,
        });
        reference
    }

    /// Writes one slot of a waiting frame and counts down its missing inputs.
    /// Returns true if this write made the frame ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownFrame`] if the frame is not waiting in this
    /// queue, and [`Error::SlotOverwritten`] if the slot was already filled.
    pub fn write_slot(&self, frame: FrameRef, slot: Slot, value: ArgValue) -> Result<bool> {
        if frame.owner() != self.owner {
            return Err(Error::UnknownFrame(frame));
        }

        let mut table = lock(&self.table);
        let Some(waiting) = table.waiting.get_mut(&frame.id()) else {
            return Err(Error::UnknownFrame(frame));
        };

        if !waiting.frame.args.fill(slot, value) {
            return Err(Error::SlotOverwritten { frame, slot });
        }

        waiting.remaining -= 1;
        if waiting.remaining > 0 {
            return Ok(false);
        }

        if let Some(waiting) = table.waiting.remove(&frame.id()) {
            table.ready.push_back(waiting.frame);
        }
        Ok(true)
    }

    /// Takes the most recently readied frame. Meant for the owner, which
    /// works depth-first through what it just produced.
    pub fn pop_local(&self) -> Option<Frame<B>> {
        lock(&self.table).ready.pop_back()
    }

    /// Takes the oldest ready frame. Meant for thieves, which stay away from
    /// the end the owner is working on.
    pub fn steal_remote(&self) -> Option<Frame<B>> {
        lock(&self.table).ready.pop_front()
    }

    /// Returns the number of frames waiting for inputs.
    pub fn waiting(&self) -> usize {
        lock(&self.table).waiting.len()
    }

    /// Returns the number of frames ready to run.
    pub fn ready(&self) -> usize {
        lock(&self.table).ready.len()
    }
}

// -----------------------------------------------------------------------------
// Tests
