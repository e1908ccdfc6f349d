//! Bounded queues used to hand work between threads.
//!
//! - [`lockfree`]: multi-producer/multi-consumer ring, fails instead of blocking
//! - [`blocking`]: single-producer/single-consumer ring guarded by semaphores
//! - [`deque`]: Chase-Lev work-stealing deque

pub mod blocking;
pub mod deque;
pub mod lockfree;

pub use deque::Steal;
pub use lockfree::LfQueue;

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;

/// Fixed ring of possibly-uninitialized slots shared by the queue flavors.
///
/// The ring never knows which slots are live; every owner tracks that with
/// its own cursors and must drop leftovers itself.
pub(crate) struct Ring<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

impl<T> Ring<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "queue capacity must be a power of two, got {capacity}"
        );

        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        Self {
            slots,
            mask: capacity - 1,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// # Safety
    /// The caller must hold exclusive access to slot `index` and the slot
    /// must not contain a live value.
    #[inline]
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        let slot = &self.slots[index & self.mask];
        unsafe { (*slot.get()).write(value) };
    }

    /// # Safety
    /// The slot must contain a live value that no one else reads.
    #[inline]
    pub(crate) unsafe fn read(&self, index: usize) -> T {
        let slot = &self.slots[index & self.mask];
        unsafe { (*slot.get()).assume_init_read() }
    }

    /// Copies the slot out without claiming it.
    ///
    /// # Safety
    /// The result may only be assumed initialized once the caller has won
    /// ownership of the slot; otherwise it must be discarded unread.
    #[inline]
    pub(crate) unsafe fn read_uninit(&self, index: usize) -> MaybeUninit<T> {
        let slot = &self.slots[index & self.mask];
        unsafe { ptr::read_volatile(slot.get()) }
    }
}

unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}
