//! A lock-free work-stealing deque, after Chase and Lev.
//!
//! Each deque has a single owner that pushes and pops at the *bottom* end,
//! and any number of thieves that steal from the *top* end. The owner works
//! LIFO, which keeps freshly produced work hot in cache, while thieves take
//! the oldest entries, which tend to be the largest pieces of work left.
//!
//! The deque stores small copyable handles rather than arbitrary values, so
//! every slot is an atomic word. A thief that races with the owner may read a
//! slot that is about to be reused, but it only keeps the value if its
//! compare-and-swap on `top` succeeds, which proves the slot was still live.
//!
//! The ring buffer grows when full. Old buffers are retired rather than freed,
//! because a slow thief may still be reading from one; they are released when
//! the deque itself is dropped.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::marker::PhantomData;
use core::ptr;

use crossbeam_utils::CachePadded;

use crate::platform::*;

/// The smallest buffer a deque will allocate.
const MIN_CAPACITY: usize = 2;

/// The default initial capacity, matching the size of a typical fork-join
/// frontier before any growth is needed.
const DEFAULT_CAPACITY: usize = 1024;

// -----------------------------------------------------------------------------
// Handles

/// A small copyable value that can be stored in a [`Deque`]. Handles are
/// stored as raw machine words.
pub trait Handle: Copy + Send {
    /// Converts the handle into a raw word.
    fn into_raw(self) -> usize;

    /// Recovers a handle from a raw word produced by [`Handle::into_raw`].
    fn from_raw(raw: usize) -> Self;
}

impl Handle for usize {
    #[inline(always)]
    fn into_raw(self) -> usize {
        self
    }

    #[inline(always)]
    fn from_raw(raw: usize) -> usize {
        raw
    }
}

// -----------------------------------------------------------------------------
// Steal outcomes

/// The outcome of a steal attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Steal<T> {
    /// The deque was empty.
    Empty,
    /// The deque had work, but another thread claimed it first. The caller
    /// should move on to a different victim rather than spinning here.
    Retry,
    /// An item was stolen.
    Success(T),
}

impl<T> Steal<T> {
    /// Returns the stolen item, if there was one.
    #[inline]
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(item) => Some(item),
            Steal::Empty | Steal::Retry => None,
        }
    }

    /// Returns true if the deque was observed empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Steal::Empty)
    }
}

impl<T> From<Option<T>> for Steal<T> {
    fn from(item: Option<T>) -> Steal<T> {
        match item {
            Some(item) => Steal::Success(item),
            None => Steal::Empty,
        }
    }
}

// -----------------------------------------------------------------------------
// Buffer

/// A fixed-size, power-of-two ring of atomic slots. Indices wrap with a mask.
struct Buffer {
    slots: Box<[AtomicUsize]>,
    mask: usize,
}

impl Buffer {
    fn new(capacity: usize) -> Buffer {
        debug_assert!(capacity.is_power_of_two());
        let slots = (0..capacity).map(|_| AtomicUsize::new(0)).collect();
        Buffer {
            slots,
            mask: capacity - 1,
        }
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    #[inline(always)]
    fn read(&self, index: usize) -> usize {
        self.slots[index & self.mask].load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn write(&self, index: usize, raw: usize) {
        self.slots[index & self.mask].store(raw, Ordering::Relaxed);
    }
}

// -----------------------------------------------------------------------------
// Deque

/// A single-owner, multi-thief work-stealing deque of handles.
///
/// Only the owning worker may call [`Deque::push`] and [`Deque::pop`]. Any
/// thread may call [`Deque::steal`]. Each pushed item is returned by exactly
/// one `pop` or `steal`, no matter how those calls race.
pub struct Deque<T> {
    /// The index of the oldest item; advanced by thieves, and by the owner
    /// when it contends for the last item.
    top: CachePadded<AtomicUsize>,
    /// One past the index of the newest item; written only by the owner.
    bottom: CachePadded<AtomicUsize>,
    /// The current ring buffer; replaced only by the owner.
    buffer: CachePadded<AtomicPtr<Buffer>>,
    /// Buffers replaced by growth. Thieves may still hold references into
    /// these, so they live until the deque is dropped.
    retired: Mutex<Vec<Box<Buffer>>>,
    _marker: PhantomData<T>,
}

impl<T: Handle> Deque<T> {
    /// Creates an empty deque with the default capacity.
    pub fn new() -> Deque<T> {
        Deque::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty deque able to hold `capacity` items before growing.
    /// The capacity is rounded up to a power of two.
    pub fn with_capacity(capacity: usize) -> Deque<T> {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();
        let buffer = Box::into_raw(Box::new(Buffer::new(capacity)));
        Deque {
            top: CachePadded::new(AtomicUsize::new(0)),
            bottom: CachePadded::new(AtomicUsize::new(0)),
            buffer: CachePadded::new(AtomicPtr::new(buffer)),
            retired: Mutex::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    /// Returns the number of items the current buffer can hold.
    pub fn capacity(&self) -> usize {
        self.current_buffer().capacity()
    }

    /// Returns a snapshot of the number of items in the deque. Under
    /// concurrent use this may already be stale when it returns.
    pub fn len(&self) -> usize {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Relaxed);
        let len = bottom.wrapping_sub(top) as isize;
        len.max(0) as usize
    }

    /// Returns true if the deque appeared empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    fn current_buffer(&self) -> &Buffer {
        // SAFETY: The pointer always comes from `Box::into_raw`, and buffers
        // are only freed when the deque is dropped, which requires exclusive
        // access. So the buffer lives at least as long as `&self`.
        unsafe { &*self.buffer.load(Ordering::Acquire) }
    }

    /// Pushes an item onto the bottom of the deque. Owner only.
    #[inline]
    pub fn push(&self, item: T) {
        let bottom = self.bottom.load(Ordering::Relaxed);
        let top = self.top.load(Ordering::Acquire);

        let mut buffer = self.current_buffer();
        if bottom.wrapping_sub(top) >= buffer.capacity() {
            buffer = self.grow(top, bottom);
        }

        buffer.write(bottom, item.into_raw());

        // Publish the item. A thief that observes the new bottom also observes
        // the slot written above.
        self.bottom.store(bottom.wrapping_add(1), Ordering::Release);
    }

    /// Pops the most recently pushed item. Owner only.
    #[inline]
    pub fn pop(&self) -> Option<T> {
        let bottom = self.bottom.load(Ordering::Relaxed);

        // Thieves only ever advance `top`, so a stale read can only make the
        // deque look fuller than it is. If it looks empty, it is empty, and we
        // avoid decrementing `bottom` below zero.
        let top = self.top.load(Ordering::Relaxed);
        if bottom.wrapping_sub(top) as isize <= 0 {
            return None;
        }

        // Speculatively claim the bottom item.
        let bottom = bottom.wrapping_sub(1);
        let buffer = self.current_buffer();
        self.bottom.store(bottom, Ordering::Relaxed);

        // Order the store to `bottom` before the load of `top`, pairing with the
        // fence in `steal`. Either we see the thief's claim, or it sees ours.
        fence(Ordering::SeqCst);

        let top = self.top.load(Ordering::Relaxed);
        let len = bottom.wrapping_sub(top) as isize;

        if len < 0 {
            // A thief emptied the deque in the meantime.
            self.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);
            return None;
        }

        let raw = buffer.read(bottom);

        if len > 0 {
            // There is more than one item left, so no thief can reach this one.
            return Some(T::from_raw(raw));
        }

        // This is the last item, and thieves may be contending for it. Whoever
        // advances `top` gets it.
        let won = self
            .top
            .compare_exchange(
                top,
                top.wrapping_add(1),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_ok();

        self.bottom.store(bottom.wrapping_add(1), Ordering::Relaxed);

        won.then(|| T::from_raw(raw))
    }

    /// Attempts to steal the oldest item. Any thread may call this.
    #[inline]
    pub fn steal(&self) -> Steal<T> {
        let top = self.top.load(Ordering::Acquire);

        // Pairs with the fence in `pop`.
        fence(Ordering::SeqCst);

        let bottom = self.bottom.load(Ordering::Acquire);
        if bottom.wrapping_sub(top) as isize <= 0 {
            return Steal::Empty;
        }

        // This may read a slot the owner is about to reuse. That is harmless:
        // the value is discarded unless the compare-and-swap below succeeds.
        let raw = self.current_buffer().read(top);

        if self
            .top
            .compare_exchange(
                top,
                top.wrapping_add(1),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return Steal::Retry;
        }

        Steal::Success(T::from_raw(raw))
    }

    /// Doubles the size of the buffer, copying over the live items. Owner only.
    #[cold]
    fn grow(&self, top: usize, bottom: usize) -> &Buffer {
        let old_ptr = self.buffer.load(Ordering::Relaxed);
        // SAFETY: Only the owner replaces the buffer, and we are the owner, so
        // `old_ptr` is the live buffer and cannot be retired under us.
        let old = unsafe { &*old_ptr };

        let new = Buffer::new(old.capacity() * 2);
        let mut index = top;
        while index != bottom {
            new.write(index, old.read(index));
            index = index.wrapping_add(1);
        }

        tracing::trace!(capacity = new.capacity(), "growing deque");

        let new_ptr = Box::into_raw(Box::new(new));
        self.buffer.store(new_ptr, Ordering::Release);

        // SAFETY: `old_ptr` came from `Box::into_raw` and is no longer
        // reachable through `self.buffer`. Ownership moves to the retired list,
        // which keeps it allocated for any thief still reading it.
        lock(&self.retired).push(unsafe { Box::from_raw(old_ptr) });

        // SAFETY: The new buffer was just allocated and is freed only on drop.
        unsafe { &*new_ptr }
    }
}

impl<T: Handle> Default for Deque<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        let buffer = self.buffer.swap(ptr::null_mut(), Ordering::Relaxed);
        if !buffer.is_null() {
            // SAFETY: The pointer came from `Box::into_raw`, and dropping the
            // deque means no other thread can still be using it.
            drop(unsafe { Box::from_raw(buffer) });
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
