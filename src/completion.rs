//! Termination detection for a pool of workers.
//!
//! A [`Completion`] tracks how many units of work are outstanding: queued,
//! running, or (for frames) waiting for inputs. Whoever creates work adds to
//! the count before the work can be observed by anyone else, and whoever
//! finishes work subtracts from it afterwards, so the count can only reach
//! zero once nothing is left anywhere in the pool.
//!
//! The thread that started the run waits for the count to reach zero, either
//! by spinning on it or by sleeping on a futex. Workers never block, so the
//! spinning strategy trades a core for the lowest possible wake-up latency.

use core::hint;
use core::str::FromStr;
use core::sync::atomic::AtomicU32;

use crossbeam_utils::CachePadded;

use crate::platform::*;

// -----------------------------------------------------------------------------
// States

/// Work is still outstanding.
const RUNNING: u32 = 0;

/// The outstanding count reached zero, or the run was aborted.
const DONE: u32 = 1;

/// How many spins between yields while busy-polling.
const SPINS_PER_YIELD: u32 = 64;

// -----------------------------------------------------------------------------
// Wait strategy

/// How the thread that started a run waits for it to finish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WaitStrategy {
    /// Busy-poll the outstanding-work counter.
    #[default]
    Spin,
    /// Sleep until the worker that finishes the last unit wakes us.
    Block,
}

impl FromStr for WaitStrategy {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<WaitStrategy, Self::Err> {
        match s {
            "spin" => Ok(WaitStrategy::Spin),
            "block" => Ok(WaitStrategy::Block),
            _ => Err("expected `spin` or `block`"),
        }
    }
}

// -----------------------------------------------------------------------------
// Completion

/// The outstanding-work counter and stop flag shared by a pool.
pub struct Completion {
    /// Units of work created but not yet finished.
    outstanding: CachePadded<AtomicUsize>,
    /// Set once the waiting thread has seen completion; tells workers to exit.
    stop: CachePadded<AtomicBool>,
    /// Futex word for blocking waiters. This is always a real atomic, since
    /// the futex operates on its address.
    state: AtomicU32,
}

impl Completion {
    /// Creates a counter with `initial` units of work outstanding. A counter
    /// created at zero is already complete.
    pub fn new(initial: usize) -> Completion {
        Completion {
            outstanding: CachePadded::new(AtomicUsize::new(initial)),
            stop: CachePadded::new(AtomicBool::new(false)),
            state: AtomicU32::new(if initial == 0 { DONE } else { RUNNING }),
        }
    }

    /// Returns the current number of outstanding units.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Records `count` new units of work. This must happen before the new work
    /// is made visible to other workers, and while the caller's own unit is
    /// still counted.
    #[inline]
    pub fn add(&self, count: usize) {
        self.outstanding.fetch_add(count, Ordering::Relaxed);
    }

    /// Records that one unit of work has finished. Returns true if it was the
    /// last one.
    #[inline]
    pub fn complete_one(&self) -> bool {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous != 0, "outstanding work counter underflow");
        if previous == 1 {
            tracing::trace!("outstanding work reached zero");
            self.signal();
            true
        } else {
            false
        }
    }

    /// Marks the run as finished even though work may remain. Used when a
    /// frame program fails and the pool has to shut down early.
    #[cold]
    pub fn abort(&self) {
        tracing::debug!(outstanding = self.outstanding(), "aborting run");
        self.signal();
    }

    /// Returns true once the run has finished or been aborted.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    /// Blocks the calling thread until the run finishes.
    pub fn wait(&self, strategy: WaitStrategy) {
        match strategy {
            WaitStrategy::Spin => {
                let mut spins = 0;
                while self.outstanding() > 0 && !self.is_done() {
                    spins += 1;
                    if spins % SPINS_PER_YIELD == 0 {
                        yield_now();
                    } else {
                        hint::spin_loop();
                    }
                }
            }
            WaitStrategy::Block => {
                while !self.is_done() {
                    atomic_wait::wait(&self.state, RUNNING);
                }
            }
        }
    }

    /// Tells workers to exit their loops.
    #[inline]
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Returns true if workers should exit.
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn signal(&self) {
        if self.state.swap(DONE, Ordering::Release) == RUNNING {
            atomic_wait::wake_all(&self.state);
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
