//! Error types shared by the pool and the reactor.
//!
//! Capacity failures on the queues hand the rejected item back instead of
//! going through [`Error`], since the caller usually wants to retry with it.

use std::error::Error as StdError;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A centralized error type for pool, dispatcher and reactor operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A bounded queue had no free slot.
    #[error("queue is full")]
    Full,

    /// Work was submitted to a pool that is not running.
    #[error("thread pool is not running")]
    NotRunning,

    /// The calling thread has no thread pool associated with it.
    #[error("no thread pool associated with the calling thread")]
    NoPool,

    /// A task failed while the caller was waiting on it.
    #[error("task failed: {0}")]
    Task(#[from] TaskError),

    /// The signal number is outside `1..64`.
    #[error("invalid signal number {0}")]
    InvalidSignal(i32),

    /// Another reactor already owns the signal.
    #[error("signal {0} is already owned by another reactor")]
    SignalOwned(i32),

    /// The descriptor is negative or otherwise unusable.
    #[error("invalid handle {0}")]
    InvalidHandle(RawFd),

    /// The descriptor is already being watched.
    #[error("handle {0} is already registered")]
    HandleExists(RawFd),

    /// A registration call into the OS failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// FATAL: the reactor's blocking wait failed for a reason other than
    /// an interrupt or a spurious wakeup.
    #[error("FATAL: reactor error waiting on handles: {0}")]
    Fatal(io::Error),
}

impl Error {
    /// True for the unrecoverable reactor condition.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// True when retrying later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Full => true,
            Error::Io(e) => e
                .raw_os_error()
                .is_some_and(|errno| matches!(errno, libc::EAGAIN | libc::EINTR)),
            _ => false,
        }
    }
}

/// Failure raised inside a task's `run`.
///
/// Cloneable so that the same failure can be recorded by a task group and
/// still propagate out of the worker that ran it.
#[derive(thiserror::Error, Debug, Clone)]
pub enum TaskError {
    /// The task returned an error.
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    /// The task panicked; the payload message is kept when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Wraps any error value.
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        TaskError::Failed(Arc::from(err.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        TaskError::Panicked(message)
    }
}

impl PartialEq for TaskError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Failed(a), Self::Failed(b)) => a.to_string() == b.to_string(),
            (Self::Panicked(a), Self::Panicked(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_messages() {
        let err = TaskError::from_panic(Box::new("boom"));
        assert_eq!(err, TaskError::Panicked("boom".to_string()));

        let err = TaskError::from_panic(Box::new(String::from("bang")));
        assert_eq!(err.to_string(), "task panicked: bang");

        let err = TaskError::from_panic(Box::new(42u32));
        assert!(matches!(err, TaskError::Panicked(m) if m.contains("non-string")));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::Fatal(io::Error::from_raw_os_error(libc::EBADF)).is_fatal());
        assert!(!Error::Full.is_fatal());
        assert!(Error::Full.is_retryable());
        assert!(Error::Io(io::Error::from_raw_os_error(libc::EINTR)).is_retryable());
        assert!(!Error::SignalOwned(2).is_retryable());
    }

    #[test]
    fn test_task_error_converts() {
        let err: Error = TaskError::failed("disk on fire").into();
        assert_eq!(err.to_string(), "task failed: disk on fire");
    }
}
