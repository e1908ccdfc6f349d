//! Completion counter: tracks a number of in-flight activities and lets one
//! observer block until that number drops back to zero.
//!
//! The gate semaphore is closed exactly while the count is non-zero. Only
//! the increment that moves the count off zero closes it, and only the
//! decrement that brings it back to zero opens it, so racing callers never
//! double-toggle the gate.

use crate::sync::semaphore::Semaphore;
use crate::time::Timeout;

use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug)]
pub struct Completion {
    count: AtomicU32,
    gate: Semaphore,
}

impl Completion {
    pub fn new() -> Self {
        Self {
            count: AtomicU32::new(0),
            gate: Semaphore::new(1),
        }
    }

    /// Records `n` more activities in flight.
    pub fn increment(&self, n: u32) {
        if n == 0 {
            return;
        }
        if self.count.fetch_add(n, Ordering::AcqRel) == 0 {
            self.gate.wait();
        }
    }

    /// Records `n` activities as finished.
    pub fn decrement(&self, n: u32) {
        if n == 0 {
            return;
        }
        let previous = self.count.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(previous >= n, "completion count went negative");
        if previous == n {
            self.gate.post();
        }
    }

    /// Number of activities in flight.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// True when nothing is in flight.
    pub fn done(&self) -> bool {
        self.count() == 0
    }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        if !self.done() {
            self.gate.wait();
            self.gate.post();
        }
    }

    /// Blocks until the count reaches zero or `timeout` elapses.
    ///
    /// Returns `true` if the count reached zero.
    pub fn wait_for(&self, timeout: Timeout) -> bool {
        if self.done() {
            return true;
        }
        if self.gate.wait_for(timeout) {
            self.gate.post();
            return true;
        }
        false
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let count = *self.count.get_mut();
        if count != 0 {
            tracing::error!(count, "completion dropped with activities still in flight");
        }
    }
}
