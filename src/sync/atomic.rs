//! Atomic helpers shared by the lock-free structures.
//!
//! Plain loads, stores, swaps, compare-and-swaps and fetch-adds come straight
//! from `std::sync::atomic`; this module only adds the pieces std leaves out:
//! a named store/load fence, bounded spinning, and cache-line padding.

use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicUsize, Ordering, fence};

pub use crossbeam_utils::CachePadded;

/// Full store/load barrier.
///
/// Orders a preceding store before a following load on another location,
/// the one reordering acquire/release does not forbid.
#[inline]
pub fn fence_store_load() {
    fence(Ordering::SeqCst);
}

/// Spins (then yields) until `cursor` holds `expected`.
///
/// Used by the reserve/commit queues: a writer that reserved slot `n` must
/// wait for the writer of slot `n - 1` to publish before it can publish.
#[inline]
pub fn spin_until_equal(cursor: &AtomicUsize, expected: usize) {
    let backoff = Backoff::new();
    while cursor.load(Ordering::Acquire) != expected {
        backoff.snooze();
    }
}

/// Adds `delta` to `value` only while the result stays `<= limit`.
///
/// Returns the previous value on success.
pub fn fetch_add_bounded(value: &AtomicUsize, delta: usize, limit: usize) -> Option<usize> {
    value
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            current.checked_add(delta).filter(|next| *next <= limit)
        })
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_spin_until_equal_waits_for_publisher() {
        let cursor = Arc::new(AtomicUsize::new(0));
        let publisher = cursor.clone();

        let handle = thread::spawn(move || {
            for n in 1..=3 {
                publisher.store(n, Ordering::Release);
            }
        });

        spin_until_equal(&cursor, 3);
        handle.join().unwrap();
        assert_eq!(cursor.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_fetch_add_bounded() {
        let value = AtomicUsize::new(6);
        assert_eq!(fetch_add_bounded(&value, 2, 8), Some(6));
        assert_eq!(fetch_add_bounded(&value, 1, 8), None);
        assert_eq!(value.load(Ordering::Relaxed), 8);
        assert_eq!(fetch_add_bounded(&value, usize::MAX, usize::MAX), None);
    }
}
