// Lock-free double buffer shared between the amplifier interrupt and the
// serial service loop
//
// The single writer fills the slot readers are not pointed at, then swaps the
// published index. A generation counter lets readers detect that the writer
// lapped them while they were copying and retry.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering, fence};

pub struct DoubleBuffer<T: Copy> {
    slots: [UnsafeCell<T>; 2],
    published: AtomicUsize,
    generation: AtomicU32,
}

// SAFETY: one writer at a time (callers uphold this), readers only copy out
// and discard copies that raced with a write.
unsafe impl<T: Copy + Send> Sync for DoubleBuffer<T> {}

impl<T: Copy> DoubleBuffer<T> {
    pub const fn new(value: T) -> Self {
        Self {
            slots: [UnsafeCell::new(value), UnsafeCell::new(value)],
            published: AtomicUsize::new(0),
            generation: AtomicU32::new(0),
        }
    }

    /// Publish a new value. Must only be called from one thread.
    pub fn write(&self, value: T) {
        let shadow = self.published.load(Ordering::Relaxed) ^ 1;
        fence(Ordering::Release);
        // SAFETY: single writer; readers are pointed at the other slot and
        // a reader still holding the old index sees the generation change.
        unsafe {
            *self.slots[shadow].get() = value;
        }
        self.published.store(shadow, Ordering::Release);
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Copy out the most recently published value
    pub fn read(&self) -> T {
        loop {
            let start = self.generation.load(Ordering::Acquire);
            let index = self.published.load(Ordering::Acquire);
            // SAFETY: T is Copy; a copy that overlapped a write is discarded
            // because the generation moved.
            let value = unsafe { *self.slots[index].get() };
            fence(Ordering::Acquire);
            if self.generation.load(Ordering::Relaxed) == start {
                return value;
            }
            std::hint::spin_loop();
        }
    }

    /// Number of writes so far
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }
}

impl<T: Copy + Default> Default for DoubleBuffer<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
