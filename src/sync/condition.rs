//! Condition variable with `Timeout`-based waits.

use crate::time::Timeout;

use parking_lot::{Condvar, MutexGuard};
use std::time::Instant;

/// A condition variable paired with a `parking_lot` mutex.
#[derive(Debug, Default)]
pub struct Condition {
    inner: Condvar,
}

impl Condition {
    pub const fn new() -> Self {
        Self {
            inner: Condvar::new(),
        }
    }

    /// Blocks until signaled. Spurious wakeups are possible.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        self.inner.wait(guard);
    }

    /// Blocks until signaled or until `timeout` elapses.
    ///
    /// Returns `false` if the wait timed out.
    pub fn wait_for<T>(&self, guard: &mut MutexGuard<'_, T>, timeout: Timeout) -> bool {
        match timeout {
            Timeout::Forever => {
                self.inner.wait(guard);
                true
            }
            Timeout::After(d) if d.is_zero() => false,
            Timeout::After(d) => !self.inner.wait_for(guard, d).timed_out(),
        }
    }

    /// Blocks until signaled or the deadline passes; `None` waits forever.
    pub fn wait_until<T>(&self, guard: &mut MutexGuard<'_, T>, deadline: Option<Instant>) -> bool {
        match deadline {
            None => {
                self.inner.wait(guard);
                true
            }
            Some(at) => !self.inner.wait_until(guard, at).timed_out(),
        }
    }

    /// Wakes one waiter.
    pub fn signal(&self) -> bool {
        self.inner.notify_one()
    }

    /// Wakes every waiter.
    pub fn broadcast(&self) -> usize {
        self.inner.notify_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_for_times_out() {
        let mutex = Mutex::new(());
        let cond = Condition::new();
        let mut guard = mutex.lock();

        let start = Instant::now();
        assert!(!cond.wait_for(&mut guard, Timeout::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!cond.wait_for(&mut guard, Timeout::NONE));
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let shared = Arc::new((Mutex::new(false), Condition::new()));
        let other = shared.clone();

        let handle = thread::spawn(move || {
            let (lock, cond) = &*other;
            *lock.lock() = true;
            cond.broadcast();
        });

        let (lock, cond) = &*shared;
        let mut ready = lock.lock();
        while !*ready {
            cond.wait_for(&mut ready, Timeout::from_millis(100));
        }
        drop(ready);
        handle.join().unwrap();
    }
}
