//! Chase-Lev work-stealing deque with a fixed ring.
//!
//! The owner pushes and pops at `bottom` (LIFO); thieves take from `top`
//! (FIFO). Both cursors only grow, so a stale `top` can never be confused
//! with a recycled one and a single-word CAS is enough.
//!
//! The only contended transition is the last element: the owner's pop and
//! a thief's steal both CAS `top` forward, and exactly one of them wins.

use crate::queue::Ring;
use crate::sync::atomic::{CachePadded, fence_store_load};

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Outcome of [`Stealer::steal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal<T> {
    /// Took the oldest item.
    Success(T),
    /// Nothing to take.
    Empty,
    /// Lost a race with the owner or another thief; calling again may succeed.
    Retry,
}

impl<T> Steal<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Steal::Empty)
    }
}

struct Inner<T> {
    ring: Ring<T>,
    top: CachePadded<AtomicUsize>,
    bottom: CachePadded<AtomicUsize>,
}

impl<T> Inner<T> {
    fn len(&self) -> usize {
        let top = self.top.load(Ordering::Acquire);
        let bottom = self.bottom.load(Ordering::Acquire);
        let len = bottom.wrapping_sub(top) as isize;
        len.max(0) as usize
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let top = *self.top.get_mut();
        let bottom = *self.bottom.get_mut();
        let mut index = top;
        while (bottom.wrapping_sub(index) as isize) > 0 {
            // SAFETY: exclusive access; slots in top..bottom are live.
            drop(unsafe { self.ring.read(index) });
            index = index.wrapping_add(1);
        }
    }
}

/// Owner half: the only handle that can push or pop.
pub struct Worker<T> {
    inner: Arc<Inner<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

/// Thief half: any number of threads may steal through clones of it.
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

/// Creates a deque holding at most `capacity` items.
///
/// # Panics
/// Panics if `capacity` is not a power of two.
pub fn deque<T: Send>(capacity: usize) -> (Worker<T>, Stealer<T>) {
    let inner = Arc::new(Inner {
        ring: Ring::new(capacity),
        top: CachePadded::new(AtomicUsize::new(0)),
        bottom: CachePadded::new(AtomicUsize::new(0)),
    });

    let worker = Worker {
        inner: inner.clone(),
        _not_sync: PhantomData,
    };

    (worker, Stealer { inner })
}

impl<T> Worker<T> {
    /// Pushes at the bottom; hands the item back if the deque is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let inner = &*self.inner;
        let bottom = inner.bottom.load(Ordering::Relaxed);
        let top = inner.top.load(Ordering::Acquire);

        if bottom.wrapping_sub(top) >= inner.ring.capacity() {
            return Err(item);
        }

        // SAFETY: slot `bottom` is outside top..bottom, so no thief reads it
        // until the release store below publishes it.
        unsafe { inner.ring.write(bottom, item) };
        inner
            .bottom
            .store(bottom.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Pops the most recently pushed item.
    pub fn pop(&self) -> Option<T> {
        let inner = &*self.inner;
        let bottom = inner.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        inner.bottom.store(bottom, Ordering::Relaxed);

        fence_store_load();

        let top = inner.top.load(Ordering::Relaxed);
        let len = bottom.wrapping_sub(top) as isize;

        if len < 0 {
            inner
                .bottom
                .store(bottom.wrapping_add(1), Ordering::Relaxed);
            return None;
        }

        // SAFETY: bottom was pulled below this slot, so only a thief racing
        // for the last element can still read it; the CAS settles that.
        let slot = unsafe { inner.ring.read_uninit(bottom) };

        if len > 0 {
            return Some(unsafe { slot.assume_init() });
        }

        let won = inner
            .top
            .compare_exchange(
                top,
                top.wrapping_add(1),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_ok();
        inner
            .bottom
            .store(bottom.wrapping_add(1), Ordering::Relaxed);

        // A lost race leaves the copy unclaimed; the thief owns the item.
        won.then(|| unsafe { slot.assume_init() })
    }

    /// Creates another thief handle for this deque.
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: self.inner.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.ring.capacity()
    }
}

impl<T> Stealer<T> {
    /// Attempts once to take the oldest item.
    pub fn steal(&self) -> Steal<T> {
        let inner = &*self.inner;
        let top = inner.top.load(Ordering::Acquire);

        fence_store_load();

        let bottom = inner.bottom.load(Ordering::Acquire);
        if (bottom.wrapping_sub(top) as isize) <= 0 {
            return Steal::Empty;
        }

        // SAFETY: only assumed initialized after the CAS proves the slot
        // was still unclaimed when it was copied.
        let slot = unsafe { inner.ring.read_uninit(top) };

        if inner
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

        Steal::Success(unsafe { slot.assume_init() })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Stealer {
            inner: self.inner.clone(),
        }
    }
}

unsafe impl<T: Send> Send for Worker<T> {}
unsafe impl<T: Send> Send for Stealer<T> {}
unsafe impl<T: Send> Sync for Stealer<T> {}

impl<T> fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker").field("len", &self.len()).finish()
    }
}

impl<T> fmt::Debug for Stealer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stealer").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_owner_is_lifo_thief_is_fifo() {
        let (worker, stealer) = deque(8);
        for i in 1..=4 {
            worker.push(i).unwrap();
        }

        assert_eq!(worker.pop(), Some(4));
        assert_eq!(stealer.steal(), Steal::Success(1));
        assert_eq!(worker.len(), 2);
        assert_eq!(worker.pop(), Some(3));
        assert_eq!(worker.pop(), Some(2));
        assert_eq!(worker.pop(), None);
        assert!(stealer.steal().is_empty());
    }

    #[test]
    fn test_full_deque_rejects_push() {
        let (worker, stealer) = deque(4);
        for i in 0..4 {
            worker.push(i).unwrap();
        }
        assert_eq!(worker.push(4), Err(4));
        assert_eq!(stealer.steal().success(), Some(0));
        assert!(worker.push(4).is_ok());
    }

    #[test]
    fn test_empty_pop_keeps_cursors_consistent() {
        let (worker, stealer) = deque::<u32>(4);
        assert_eq!(worker.pop(), None);
        assert_eq!(worker.pop(), None);
        worker.push(7).unwrap();
        assert_eq!(stealer.len(), 1);
        assert_eq!(worker.pop(), Some(7));
        assert!(worker.is_empty());
    }

    #[test]
    fn test_drop_releases_items() {
        let marker = std::sync::Arc::new(());
        let (worker, stealer) = deque(4);
        worker.push(marker.clone()).unwrap();
        worker.push(marker.clone()).unwrap();
        drop(worker);
        drop(stealer);
        assert_eq!(std::sync::Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_concurrent_steal_never_duplicates() {
        const ITEMS: usize = 20_000;

        let (worker, stealer) = deque(256);
        let finished = Arc::new(AtomicBool::new(false));

        let thieves: Vec<_> = (0..3)
            .map(|_| {
                let stealer = stealer.clone();
                let finished = finished.clone();
                thread::spawn(move || {
                    let mut taken = Vec::new();
                    loop {
                        let done = finished.load(Ordering::Acquire);
                        match stealer.steal() {
                            Steal::Success(item) => taken.push(item),
                            Steal::Retry => continue,
                            Steal::Empty if done => break,
                            Steal::Empty => thread::yield_now(),
                        }
                    }
                    taken
                })
            })
            .collect();

        let mut mine = Vec::new();
        for i in 0..ITEMS {
            let mut item = i;
            while let Err(back) = worker.push(item) {
                item = back;
                if let Some(popped) = worker.pop() {
                    mine.push(popped);
                }
            }
            if i % 7 == 0 {
                if let Some(popped) = worker.pop() {
                    mine.push(popped);
                }
            }
        }
        while let Some(popped) = worker.pop() {
            mine.push(popped);
        }
        finished.store(true, Ordering::Release);

        let mut seen = vec![false; ITEMS];
        for item in thieves
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .chain(mine)
        {
            assert!(!seen[item], "item {item} delivered twice");
            seen[item] = true;
        }
        assert!(seen.iter().all(|s| *s), "an item was lost");
    }
}
