//! Units of work accepted by the thread pool.

use crate::error::TaskError;

use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

/// Something a worker can run exactly once.
///
/// Implement this for work that carries state of its own; plain closures go
/// through [`Task::new`] or [`Task::fallible`] instead.
pub trait Runnable: Send {
    fn run(self: Box<Self>) -> Result<(), TaskError>;
}

struct Infallible<F>(F);

impl<F> Runnable for Infallible<F>
where
    F: FnOnce() + Send,
{
    fn run(self: Box<Self>) -> Result<(), TaskError> {
        (self.0)();
        Ok(())
    }
}

struct Fallible<F>(F);

impl<F, E> Runnable for Fallible<F>
where
    F: FnOnce() -> Result<(), E> + Send,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    fn run(self: Box<Self>) -> Result<(), TaskError> {
        (self.0)().map_err(TaskError::failed)
    }
}

/// A boxed unit of work owned by whichever queue slot holds it.
pub struct Task {
    inner: Box<dyn Runnable>,
}

impl Task {
    /// Wraps a closure that cannot fail (panics are still caught).
    ///
    /// # Example
    /// ```ignore
    /// let task = Task::new(|| println!("hello from a worker"));
    /// pool.execute(task, Timeout::Forever);
    /// ```
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::from_runnable(Infallible(f))
    }

    /// Wraps a closure whose error is reported to the pool or task group.
    pub fn fallible<F, E>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + 'static,
    {
        Self::from_runnable(Fallible(f))
    }

    pub fn from_runnable<R>(runnable: R) -> Self
    where
        R: Runnable + 'static,
    {
        Task {
            inner: Box::new(runnable),
        }
    }

    /// Wraps a closure that borrows from the caller's stack.
    ///
    /// # Safety
    /// The task must be run or dropped before anything `f` borrows goes out
    /// of scope.
    pub(crate) unsafe fn scoped<'a, F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'a,
    {
        let inner: Box<dyn Runnable + 'a> = Box::new(Infallible(f));
        // SAFETY: the lifetime is only erased; the caller upholds it.
        let inner: Box<dyn Runnable + 'static> = unsafe { std::mem::transmute(inner) };
        Task { inner }
    }

    /// Runs the task, turning a panic into [`TaskError::Panicked`].
    pub(crate) fn run(self) -> Result<(), TaskError> {
        let inner = self.inner;
        panic::catch_unwind(AssertUnwindSafe(move || inner.run()))
            .unwrap_or_else(|payload| Err(TaskError::from_panic(payload)))
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}
