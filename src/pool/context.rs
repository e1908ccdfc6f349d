//! Thread-local "current pool" of the calling thread.
//!
//! Lifecycle:
//!
//! - `ThreadPool::start` associates the starting thread, unless that thread
//!   already belongs to a pool.
//! - Every worker associates itself on entry and clears the slot on exit.
//! - `ThreadPool::stop` clears the slot if it still points at the stopped
//!   pool.
//!
//! Only a weak reference is stored, so the association never keeps a
//! dropped pool alive.

use crate::pool::core::Inner;

use std::cell::RefCell;
use std::sync::{Arc, Weak};

thread_local! {
    static CURRENT_POOL: RefCell<Option<Weak<Inner>>> = const { RefCell::new(None) };
}

/// Returns the pool associated with the calling thread, if it is still alive.
pub(crate) fn current() -> Option<Arc<Inner>> {
    CURRENT_POOL.with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
}

/// Associates the calling thread with `pool`, replacing any previous pool.
pub(crate) fn enter(pool: &Arc<Inner>) {
    CURRENT_POOL.with(|current| {
        *current.borrow_mut() = Some(Arc::downgrade(pool));
    });
}

/// Associates the calling thread with `pool` unless it already has a live one.
pub(crate) fn enter_if_unset(pool: &Arc<Inner>) {
    if current().is_none() {
        enter(pool);
    }
}

/// Clears the association if it points at `pool`.
pub(crate) fn leave(pool: &Arc<Inner>) {
    CURRENT_POOL.with(|current| {
        let mut current = current.borrow_mut();
        let matches = current
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(pool)));

        if matches {
            *current = None;
        }
    });
}
