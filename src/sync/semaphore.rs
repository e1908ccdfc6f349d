//! Counting semaphore.
//!
//! A binary semaphore is the same type created with an initial value of 1
//! and used with balanced wait/post pairs.

use crate::sync::condition::Condition;
use crate::time::Timeout;

use parking_lot::Mutex;
use std::time::Instant;

/// Counting semaphore with timed and untimed waits.
#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condition,
}

impl Semaphore {
    /// Creates a semaphore holding `initial` permits.
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condition::new(),
        }
    }

    /// Current number of permits.
    pub fn value(&self) -> usize {
        *self.count.lock()
    }

    /// Takes a permit, blocking until one is available.
    pub fn wait(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Takes a permit, blocking at most `timeout`.
    ///
    /// Returns `false` if no permit became available in time.
    pub fn wait_for(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline_from(Instant::now());
        let mut count = self.count.lock();

        while *count == 0 {
            if timeout.is_zero() || !self.available.wait_until(&mut count, deadline) {
                // Timed out, but a post may have raced the deadline.
                if *count == 0 {
                    return false;
                }
                break;
            }
        }

        *count -= 1;
        true
    }

    /// Takes a permit only if one is immediately available.
    pub fn try_wait(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Returns a permit, waking one waiter.
    pub fn post(&self) {
        let mut count = self.count.lock();
        *count += 1;
        drop(count);
        self.available.signal();
    }

    /// Returns `n` permits at once.
    pub fn post_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut count = self.count.lock();
        *count += n;
        drop(count);
        self.available.broadcast();
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}
