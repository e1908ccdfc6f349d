//! Timers kept in due order.
//!
//! Records live in a slab; the ordering is a singly linked list threaded
//! through the records, so arming and cancelling never allocate once the
//! slab has grown to the working set.

use crate::utils::{Key, Slab};

use std::fmt;
use std::time::{Duration, Instant};

/// Callback for a timer; receives the time it was fired at.
pub type TimerCallback = Box<dyn FnMut(Instant) -> bool>;

/// Identifies a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    fn key(self) -> Key {
        Key::from_bits(self.0)
    }
}

struct Timer {
    callback: TimerCallback,
    due: Instant,
    period: Option<Duration>,
    next: Option<Key>,
}

pub(crate) struct TimerList {
    timers: Slab<Timer>,
    head: Option<Key>,
}

impl TimerList {
    pub(crate) fn new() -> Self {
        TimerList {
            timers: Slab::new(8),
            head: None,
        }
    }

    pub(crate) fn insert(
        &mut self,
        callback: TimerCallback,
        due: Instant,
        period: Option<Duration>,
    ) -> TimerId {
        let key = self.timers.insert(Timer {
            callback,
            due,
            period,
            next: None,
        });
        self.link(key, due);
        TimerId(key.to_bits())
    }

    /// Links `key` after every timer due at or before `due`.
    fn link(&mut self, key: Key, due: Instant) {
        let mut prev: Option<Key> = None;
        let mut cursor = self.head;

        while let Some(current) = cursor {
            let Some(timer) = self.timers.get(current) else {
                break;
            };
            if timer.due > due {
                break;
            }
            prev = Some(current);
            cursor = timer.next;
        }

        if let Some(timer) = self.timers.get_mut(key) {
            timer.due = due;
            timer.next = cursor;
        }
        match prev.and_then(|p| self.timers.get_mut(p)) {
            Some(timer) => timer.next = Some(key),
            None => self.head = Some(key),
        }
    }

    fn unlink(&mut self, key: Key) -> bool {
        let Some(next) = self.timers.get(key).map(|t| t.next) else {
            return false;
        };

        if self.head == Some(key) {
            self.head = next;
            return true;
        }

        let mut cursor = self.head;
        while let Some(current) = cursor {
            let Some(timer) = self.timers.get_mut(current) else {
                break;
            };
            if timer.next == Some(key) {
                timer.next = next;
                return true;
            }
            cursor = timer.next;
        }
        false
    }

    pub(crate) fn remove(&mut self, id: TimerId) -> Option<TimerCallback> {
        let key = id.key();
        if !self.unlink(key) {
            return None;
        }
        self.timers.remove(key).map(|timer| timer.callback)
    }

    pub(crate) fn contains(&self, id: TimerId) -> bool {
        self.timers.contains(id.key())
    }

    /// Time left until `id` fires; zero once it is overdue.
    pub(crate) fn remaining(&self, id: TimerId, now: Instant) -> Option<Duration> {
        self.timers
            .get(id.key())
            .map(|timer| timer.due.saturating_duration_since(now))
    }

    pub(crate) fn next_due(&self) -> Option<Instant> {
        self.head
            .and_then(|key| self.timers.get(key))
            .map(|timer| timer.due)
    }

    /// Fires the earliest timer.
    ///
    /// A one-shot timer is gone before its callback runs; an interval is
    /// re-armed one period after its due time, or one period from `now`
    /// when it has fallen behind.
    pub(crate) fn fire(&mut self, now: Instant) -> bool {
        let Some(key) = self.head else {
            return false;
        };
        let Some((due, period)) = self.timers.get(key).map(|t| (t.due, t.period)) else {
            self.head = None;
            return false;
        };
        self.unlink(key);

        match period {
            None => match self.timers.remove(key) {
                Some(mut timer) => (timer.callback)(now),
                None => false,
            },
            Some(period) => {
                let mut next = due + period;
                if next <= now {
                    next = now + period;
                }
                self.link(key, next);
                match self.timers.get_mut(key) {
                    Some(timer) => (timer.callback)(now),
                    None => false,
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}

impl fmt::Debug for TimerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerList")
            .field("len", &self.timers.len())
            .field("next_due", &self.next_due())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> TimerCallback {
        let log = log.clone();
        Box::new(move |_| {
            log.borrow_mut().push(name);
            true
        })
    }

    #[test]
    fn test_fires_in_due_order_with_stable_ties() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = TimerList::new();
        let base = Instant::now();

        list.insert(recorder(&log, "late"), base + Duration::from_millis(10), None);
        list.insert(recorder(&log, "tie-a"), base + Duration::from_millis(5), None);
        list.insert(recorder(&log, "early"), base + Duration::from_millis(1), None);
        list.insert(recorder(&log, "tie-b"), base + Duration::from_millis(5), None);

        let now = base + Duration::from_millis(20);
        while list.fire(now) {}
        assert_eq!(*log.borrow(), ["early", "tie-a", "tie-b", "late"]);
        assert_eq!(list.len(), 0);
        assert_eq!(list.next_due(), None);
    }

    #[test]
    fn test_remove_unlinks_and_returns_callback() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut list = TimerList::new();
        let base = Instant::now();

        let a = list.insert(recorder(&log, "a"), base, None);
        let b = list.insert(recorder(&log, "b"), base + Duration::from_millis(1), None);

        let mut callback = list.remove(a).unwrap();
        assert!(callback(base));
        assert!(list.remove(a).is_none());
        assert!(!list.contains(a));
        assert_eq!(list.next_due(), Some(base + Duration::from_millis(1)));

        assert!(list.fire(base + Duration::from_millis(1)));
        assert!(!list.contains(b));
        assert_eq!(*log.borrow(), ["a", "b"]);
    }

    #[test]
    fn test_interval_rearms() {
        let mut list = TimerList::new();
        let base = Instant::now();
        let period = Duration::from_millis(10);
        let id = list.insert(Box::new(|_| false), base + period, Some(period));

        // On schedule: next due is one period after the previous due time.
        assert!(!list.fire(base + period));
        assert_eq!(list.next_due(), Some(base + 2 * period));

        // Far behind: re-armed relative to now.
        let late = base + Duration::from_millis(100);
        list.fire(late);
        assert_eq!(list.next_due(), Some(late + period));
        assert_eq!(list.remaining(id, late), Some(period));
        assert!(list.contains(id));
    }
}
