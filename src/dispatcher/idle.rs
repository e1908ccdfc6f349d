//! One-shot callbacks run when the dispatcher is about to block.

use crate::utils::{Key, Slab};

use std::collections::VecDeque;

const COMPACT_SLACK: usize = 8;

pub type IdleCallback = Box<dyn FnMut() -> bool>;

/// Identifies a registered idle callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleId(u64);

pub(crate) struct IdleQueue {
    callbacks: Slab<IdleCallback>,
    // Keys of removed callbacks stay here until they reach the front or
    // the queue is compacted.
    order: VecDeque<Key>,
}

impl IdleQueue {
    pub(crate) fn new() -> Self {
        IdleQueue {
            callbacks: Slab::new(4),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, callback: IdleCallback) -> IdleId {
        let key = self.callbacks.insert(callback);
        self.order.push_back(key);
        IdleId(key.to_bits())
    }

    pub(crate) fn remove(&mut self, id: IdleId) -> Option<IdleCallback> {
        let callback = self.callbacks.remove(Key::from_bits(id.0))?;
        if self.order.len() > 2 * self.callbacks.len() + COMPACT_SLACK {
            let callbacks = &self.callbacks;
            self.order.retain(|key| callbacks.contains(*key));
        }
        Some(callback)
    }

    pub(crate) fn contains(&self, id: IdleId) -> bool {
        self.callbacks.contains(Key::from_bits(id.0))
    }

    /// Removes and runs the oldest callback.
    pub(crate) fn run_next(&mut self) -> bool {
        while let Some(key) = self.order.pop_front() {
            if let Some(mut callback) = self.callbacks.remove(key) {
                return callback();
            }
        }
        false
    }

    pub(crate) fn len(&self) -> usize {
        self.callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_fifo_one_shot() {
        let order = Rc::new(Cell::new(0u32));
        let mut queue = IdleQueue::new();

        for i in 1..=3 {
            let order = order.clone();
            queue.push(Box::new(move || {
                order.set(order.get() * 10 + i);
                i == 2
            }));
        }

        assert!(!queue.run_next());
        assert!(queue.run_next());
        assert!(!queue.run_next());
        assert!(!queue.run_next());
        assert_eq!(order.get(), 123);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_removed_callback_is_skipped() {
        let mut queue = IdleQueue::new();
        let first = queue.push(Box::new(|| unreachable!()));
        let second = queue.push(Box::new(|| true));

        assert!(queue.remove(first).is_some());
        assert!(!queue.contains(first));
        assert!(queue.contains(second));
        assert!(queue.run_next());
        assert!(!queue.contains(second));
    }

    #[test]
    fn test_add_remove_churn_stays_bounded() {
        let mut queue = IdleQueue::new();
        let kept = queue.push(Box::new(|| true));

        for _ in 0..1_000 {
            let id = queue.push(Box::new(|| false));
            assert!(queue.remove(id).is_some());
        }

        assert!(queue.order.len() <= 2 * queue.len() + COMPACT_SLACK + 1);
        assert!(queue.contains(kept));
        assert!(queue.run_next());
        assert!(!queue.contains(kept));
    }
}
