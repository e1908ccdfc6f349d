//! Lock-free bounded MPMC queue.
//!
//! Four monotonically increasing cursors drive the ring:
//!
//! ```text
//!   read_commit <= read_reserve <= write_commit <= write_reserve
//! ```
//!
//! A producer first reserves a slot by moving `write_reserve` forward with a
//! CAS (only while the ring has room relative to `read_commit`), writes the
//! item, then waits its turn to move `write_commit` past its slot. Consumers
//! do the same against the read cursors. A slot therefore becomes visible to
//! readers only once its writer has published it, and is never claimed twice.

use crate::queue::Ring;
use crate::sync::atomic::{CachePadded, spin_until_equal};

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct LfQueue<T> {
    ring: Ring<T>,
    write_reserve: CachePadded<AtomicUsize>,
    write_commit: CachePadded<AtomicUsize>,
    read_reserve: CachePadded<AtomicUsize>,
    read_commit: CachePadded<AtomicUsize>,
}

impl<T> LfQueue<T> {
    /// Creates an empty queue.
    ///
    /// # Panics
    /// Panics if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
            write_reserve: CachePadded::new(AtomicUsize::new(0)),
            write_commit: CachePadded::new(AtomicUsize::new(0)),
            read_reserve: CachePadded::new(AtomicUsize::new(0)),
            read_commit: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Adds `item` at the tail; hands it back if the queue is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let capacity = self.ring.capacity();

        let mut reserved = self.write_reserve.load(Ordering::Relaxed);
        loop {
            let read = self.read_commit.load(Ordering::Acquire);
            if reserved.wrapping_sub(read) >= capacity {
                return Err(item);
            }
            match self.write_reserve.compare_exchange_weak(
                reserved,
                reserved.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => reserved = actual,
            }
        }

        // SAFETY: the CAS made slot `reserved` ours, and the capacity check
        // against read_commit guarantees its previous value was consumed.
        unsafe { self.ring.write(reserved, item) };

        spin_until_equal(&self.write_commit, reserved);
        self.write_commit
            .store(reserved.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Removes the item at the head, if any.
    pub fn pop(&self) -> Option<T> {
        let mut reserved = self.read_reserve.load(Ordering::Relaxed);
        loop {
            let written = self.write_commit.load(Ordering::Acquire);
            if written.wrapping_sub(reserved) as isize <= 0 {
                return None;
            }
            match self.read_reserve.compare_exchange_weak(
                reserved,
                reserved.wrapping_add(1),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => reserved = actual,
            }
        }

        // SAFETY: slot `reserved` was published through write_commit and the
        // CAS on read_reserve gave it to this reader alone.
        let item = unsafe { self.ring.read(reserved) };

        spin_until_equal(&self.read_commit, reserved);
        self.read_commit
            .store(reserved.wrapping_add(1), Ordering::Release);

        Some(item)
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Number of published, unconsumed items.
    pub fn used(&self) -> usize {
        let read = self.read_commit.load(Ordering::Acquire);
        let written = self.write_commit.load(Ordering::Acquire);
        written.wrapping_sub(read).min(self.capacity())
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.used()
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    pub fn is_full(&self) -> bool {
        self.used() == self.capacity()
    }
}

impl<T> Drop for LfQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> fmt::Debug for LfQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LfQueue")
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .finish()
    }
}
