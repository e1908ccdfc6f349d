//! Fluent construction of a [`ThreadPool`].

use crate::pool::core::{DEFAULT_QUEUE_SIZE, Inner, ThreadPool};
use crate::time::Timeout;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let worker_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = worker_count.fetch_add(1, Ordering::Relaxed);
        format!("evcore-worker-{id}")
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Builder for [`ThreadPool`] instances.
///
/// Defaults: 256 queue slots, at least 1 worker, at most one worker per
/// available CPU, idle workers never expire, platform default stack size.
///
/// # Example
/// ```ignore
/// let pool = ThreadPool::builder()
///     .queue_size(64)
///     .min_threads(1)
///     .max_threads(4)
///     .expiration(Timeout::from_millis(500))
///     .thread_name("render")
///     .start(2);
/// ```
#[derive(Debug)]
pub struct ThreadPoolBuilder {
    pub(crate) queue_size: usize,
    pub(crate) min_threads: usize,
    pub(crate) max_threads: usize,
    pub(crate) expiration: Timeout,
    pub(crate) stack_size: Option<usize>,
    pub(crate) thread_name: ThreadNameFn,
}

impl Default for ThreadPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPoolBuilder {
    pub fn new() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            min_threads: 1,
            max_threads: thread::available_parallelism().map_or(1, |n| n.get()),
            expiration: Timeout::Forever,
            stack_size: None,
            thread_name: default_thread_name_fn(),
        }
    }

    /// Number of queue slots; must be a power of two and at least 8.
    pub fn queue_size(mut self, size: usize) -> Self {
        self.queue_size = size;
        self
    }

    /// Workers that never expire.
    pub fn min_threads(mut self, n: usize) -> Self {
        self.min_threads = n;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// How long a worker above the minimum waits for a task before exiting.
    pub fn expiration(mut self, timeout: impl Into<Timeout>) -> Self {
        self.expiration = timeout.into();
        self
    }

    /// Stack size (in bytes) of worker threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Names every worker `val`.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    /// Generates worker names with `f`.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Builds a stopped pool.
    ///
    /// # Panics
    /// Panics if the queue size is not a power of two of at least 8.
    pub fn build(self) -> ThreadPool {
        ThreadPool::from_inner(Inner::new(&self))
    }

    /// Builds the pool and starts it with `count` workers.
    pub fn start(self, count: usize) -> ThreadPool {
        let pool = self.build();
        pool.start(count);
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let builder = ThreadPoolBuilder::new();
        assert_eq!(builder.queue_size, 256);
        assert_eq!(builder.min_threads, 1);
        assert!(builder.max_threads >= 1);
        assert_eq!(builder.expiration, Timeout::Forever);
        assert_eq!((builder.thread_name.0)(), "evcore-worker-0");
        assert_eq!((builder.thread_name.0)(), "evcore-worker-1");
    }

    #[test]
    fn test_build_applies_settings() {
        let pool = ThreadPoolBuilder::new()
            .queue_size(16)
            .min_threads(0)
            .max_threads(3)
            .expiration(std::time::Duration::from_millis(20))
            .stack_size(256 * 1024)
            .build();

        assert_eq!(pool.size(), 16);
        assert_eq!(pool.min_threads(), 0);
        assert_eq!(pool.max_threads(), 3);
        assert_eq!(pool.expiration(), Timeout::from_millis(20));
        assert_eq!(pool.stack_size(), Some(256 * 1024));
        assert!(!pool.running());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_rejects_bad_queue_size() {
        let _ = ThreadPoolBuilder::new().queue_size(100).build();
    }
}
