//! Single-producer/single-consumer ring guarded by two semaphores.
//!
//! `free` starts at the capacity and `used` at zero. The producer waits on
//! `free`, writes and posts `used`; the consumer mirrors that. The semaphores
//! carry all synchronization, so there is no exclusion between producers:
//! the halves are not `Clone`, which keeps it at one of each.

use crate::queue::Ring;
use crate::sync::Semaphore;
use crate::time::Timeout;

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Shared<T> {
    ring: Ring<T>,
    free: Semaphore,
    used: Semaphore,
    // Written only by the producer and the consumer respectively; whoever
    // drops the last half drains `tail..head`.
    head: AtomicUsize,
    tail: AtomicUsize,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let mut tail = *self.tail.get_mut();
        while tail != head {
            // SAFETY: every index in `tail..head` was published and never read.
            drop(unsafe { self.ring.read(tail) });
            tail = tail.wrapping_add(1);
        }
    }
}

/// Sending half of a [`channel`].
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Receiving half of a [`channel`].
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Creates a blocking SPSC queue holding at most `capacity` items.
///
/// # Panics
/// Panics if `capacity` is not a power of two.
pub fn channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    let shared = Arc::new(Shared {
        ring: Ring::new(capacity),
        free: Semaphore::new(capacity),
        used: Semaphore::new(0),
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });

    let producer = Producer {
        shared: shared.clone(),
        _not_sync: PhantomData,
    };
    let consumer = Consumer {
        shared,
        _not_sync: PhantomData,
    };

    (producer, consumer)
}

impl<T> Producer<T> {
    /// Appends `item`, blocking while the queue is full.
    pub fn push(&mut self, item: T) {
        self.shared.free.wait();
        self.publish(item);
    }

    /// Appends `item`, waiting at most `timeout` for room.
    pub fn try_push(&mut self, item: T, timeout: Timeout) -> Result<(), T> {
        if !self.shared.free.wait_for(timeout) {
            return Err(item);
        }
        self.publish(item);
        Ok(())
    }

    fn publish(&mut self, item: T) {
        // SAFETY: the `free` permit guarantees the consumer is done with this
        // slot, and only this producer writes.
        let head = self.shared.head.load(Ordering::Relaxed);
        unsafe { self.shared.ring.write(head, item) };
        self.shared.head.store(head.wrapping_add(1), Ordering::Release);
        self.shared.used.post();
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    pub fn used(&self) -> usize {
        self.shared.used.value()
    }

    pub fn free(&self) -> usize {
        self.shared.free.value()
    }
}

impl<T> Consumer<T> {
    /// Removes the oldest item, blocking while the queue is empty.
    pub fn pop(&mut self) -> T {
        self.shared.used.wait();
        self.take()
    }

    /// Removes the oldest item, waiting at most `timeout` for one.
    pub fn try_pop(&mut self, timeout: Timeout) -> Option<T> {
        if !self.shared.used.wait_for(timeout) {
            return None;
        }
        Some(self.take())
    }

    fn take(&mut self) -> T {
        // SAFETY: the `used` permit pairs with exactly one published write.
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let item = unsafe { self.shared.ring.read(tail) };
        self.shared.tail.store(tail.wrapping_add(1), Ordering::Release);
        self.shared.free.post();
        item
    }

    pub fn capacity(&self) -> usize {
        self.shared.ring.capacity()
    }

    pub fn used(&self) -> usize {
        self.shared.used.value()
    }

    pub fn free(&self) -> usize {
        self.shared.free.value()
    }
}

unsafe impl<T: Send> Send for Producer<T> {}
unsafe impl<T: Send> Send for Consumer<T> {}
