//! Thread pool state shared by the owner, its handles and its workers.
//!
//! The hot path (`execute`, the worker loop, helping) only touches the
//! lock-free queue, the two slot semaphores and the completion counters.
//! Configuration lives in atomics and may only change while the pool is
//! stopped; a `Configuring` state briefly fences mutators from `start`.

use crate::error::{Error, Result, TaskError};
use crate::pool::builder::{ThreadNameFn, ThreadPoolBuilder};
use crate::pool::context;
use crate::pool::task::Task;
use crate::pool::worker;
use crate::queue::LfQueue;
use crate::sync::Completion;
use crate::sync::Semaphore;
use crate::sync::atomic::fetch_add_bounded;
use crate::time::Timeout;
use crate::utils::ScopeGuard;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Default number of queue slots.
pub const DEFAULT_QUEUE_SIZE: usize = 256;

const MIN_QUEUE_SIZE: usize = 8;

const FOREVER_NANOS: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Stopped = 0,
    Configuring = 1,
    Running = 2,
    Stopping = 3,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => State::Stopped,
            1 => State::Configuring,
            2 => State::Running,
            _ => State::Stopping,
        }
    }
}

pub(crate) struct Inner {
    queue: AtomicPtr<LfQueue<Task>>,
    // Queues replaced by `set_size`, kept until the pool goes away since a
    // late reader may still hold a reference.
    retired: Mutex<Vec<Box<LfQueue<Task>>>>,
    tasks: Completion,
    threads: Completion,
    free_slots: Semaphore,
    used_slots: Semaphore,
    workers: AtomicUsize,
    min_threads: AtomicUsize,
    max_threads: AtomicUsize,
    expiration: AtomicU64,
    stack_size: AtomicUsize,
    state: AtomicU8,
    thread_name: ThreadNameFn,
    failures: Mutex<Vec<TaskError>>,
}

fn valid_queue_size(size: usize) -> bool {
    size >= MIN_QUEUE_SIZE && size.is_power_of_two()
}

fn encode_expiration(timeout: Timeout) -> u64 {
    match timeout {
        Timeout::Forever => FOREVER_NANOS,
        Timeout::After(d) => u64::try_from(d.as_nanos())
            .unwrap_or(FOREVER_NANOS)
            .min(FOREVER_NANOS - 1),
    }
}

fn decode_expiration(nanos: u64) -> Timeout {
    if nanos == FOREVER_NANOS {
        Timeout::Forever
    } else {
        Timeout::After(Duration::from_nanos(nanos))
    }
}

impl Inner {
    pub(crate) fn new(builder: &ThreadPoolBuilder) -> Self {
        assert!(
            valid_queue_size(builder.queue_size),
            "thread pool queue size must be a power of two and at least {MIN_QUEUE_SIZE}, got {}",
            builder.queue_size
        );

        let queue = Box::new(LfQueue::new(builder.queue_size));

        Self {
            queue: AtomicPtr::new(Box::into_raw(queue)),
            retired: Mutex::new(Vec::new()),
            tasks: Completion::new(),
            threads: Completion::new(),
            free_slots: Semaphore::new(builder.queue_size),
            used_slots: Semaphore::new(0),
            workers: AtomicUsize::new(0),
            min_threads: AtomicUsize::new(builder.min_threads),
            max_threads: AtomicUsize::new(builder.max_threads.max(1)),
            expiration: AtomicU64::new(encode_expiration(builder.expiration)),
            stack_size: AtomicUsize::new(builder.stack_size.unwrap_or(0)),
            state: AtomicU8::new(State::Stopped as u8),
            thread_name: builder.thread_name.clone(),
            failures: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: State, to: State) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn queue(&self) -> &LfQueue<Task> {
        // SAFETY: the pointer always refers to a live queue; replaced queues
        // are parked in `retired` rather than freed.
        unsafe { &*self.queue.load(Ordering::Acquire) }
    }

    pub(crate) fn running(&self) -> bool {
        self.state() == State::Running
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers.load(Ordering::Acquire)
    }

    pub(crate) fn task_count(&self) -> usize {
        self.tasks.count() as usize
    }

    pub(crate) fn min_threads(&self) -> usize {
        self.min_threads.load(Ordering::Acquire)
    }

    pub(crate) fn max_threads(&self) -> usize {
        self.max_threads.load(Ordering::Acquire)
    }

    pub(crate) fn expiration(&self) -> Timeout {
        decode_expiration(self.expiration.load(Ordering::Acquire))
    }

    pub(crate) fn stack_size(&self) -> Option<usize> {
        match self.stack_size.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.queue().capacity()
    }

    pub(crate) fn thread_name(&self) -> String {
        (self.thread_name.0)()
    }

    pub(crate) fn record_failure(&self, err: TaskError) {
        self.failures.lock().push(err);
    }

    pub(crate) fn take_failures(&self) -> Vec<TaskError> {
        std::mem::take(&mut *self.failures.lock())
    }

    /// Runs `f` with mutators fenced off; fails unless the pool is stopped.
    fn configure(&self, what: &str, f: impl FnOnce(&Self) -> bool) -> bool {
        if !self.transition(State::Stopped, State::Configuring) {
            tracing::warn!(setting = what, "thread pool must be stopped to change its configuration");
            return false;
        }
        let _restore = ScopeGuard::new(|| self.state.store(State::Stopped as u8, Ordering::Release));
        f(self)
    }

    pub(crate) fn set_size(&self, size: usize) -> bool {
        if !valid_queue_size(size) {
            tracing::warn!(size, "thread pool queue size must be a power of two and at least 8");
            return false;
        }

        self.configure("size", |inner| {
            let old_size = inner.size();
            if old_size == size {
                return true;
            }

            let replacement = Box::into_raw(Box::new(LfQueue::new(size)));
            let old = inner.queue.swap(replacement, Ordering::AcqRel);
            // SAFETY: `old` came from Box::into_raw and is now unreachable
            // through `queue`.
            inner.retired.lock().push(unsafe { Box::from_raw(old) });

            if size > old_size {
                inner.free_slots.post_n(size - old_size);
            } else {
                for _ in size..old_size {
                    inner.free_slots.wait();
                }
            }
            true
        })
    }

    pub(crate) fn set_min_threads(&self, n: usize) -> bool {
        self.configure("min_threads", |inner| {
            inner.min_threads.store(n, Ordering::Release);
            true
        })
    }

    pub(crate) fn set_max_threads(&self, n: usize) -> bool {
        self.configure("max_threads", |inner| {
            inner.max_threads.store(n.max(1), Ordering::Release);
            true
        })
    }

    pub(crate) fn set_expiration(&self, timeout: Timeout) -> bool {
        self.configure("expiration", |inner| {
            inner
                .expiration
                .store(encode_expiration(timeout), Ordering::Release);
            true
        })
    }

    pub(crate) fn set_stack_size(&self, size: usize) -> bool {
        self.configure("stack_size", |inner| {
            inner.stack_size.store(size, Ordering::Release);
            true
        })
    }

    pub(crate) fn start(self: &Arc<Self>, count: usize) -> usize {
        if !self.transition(State::Stopped, State::Configuring) {
            tracing::warn!("thread pool is already started");
            return 0;
        }

        let mut started = 0;
        while started < count && self.start_worker() {
            started += 1;
        }

        context::enter_if_unset(self);
        self.state.store(State::Running as u8, Ordering::Release);

        tracing::debug!(
            started,
            min = self.min_threads(),
            max = self.max_threads(),
            "thread pool started"
        );
        started
    }

    /// Spawns one worker unless that would exceed the maximum.
    fn start_worker(self: &Arc<Self>) -> bool {
        let Some(index) = fetch_add_bounded(&self.workers, 1, self.max_threads()) else {
            return false;
        };
        self.threads.increment(1);

        match worker::spawn(self.clone(), index) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%err, "failed to spawn thread pool worker");
                self.workers.fetch_sub(1, Ordering::AcqRel);
                self.threads.decrement(1);
                false
            }
        }
    }

    pub(crate) fn execute(self: &Arc<Self>, task: Task, timeout: Timeout) -> bool {
        // Counted before the state check so `stop` cannot finish draining
        // while this submission is still on its way into the queue.
        self.tasks.increment(1);
        let mut backout = ScopeGuard::new(|| self.tasks.decrement(1));

        if !self.running() {
            return false;
        }

        let in_flight = self.task_count().saturating_sub(1);
        let workers = self.worker_count();
        // Losing the race for the last worker slot means the pool is at its
        // maximum; only a pool left with no worker at all refuses.
        if in_flight >= workers
            && workers < self.max_threads()
            && !self.start_worker()
            && self.worker_count() == 0
        {
            return false;
        }

        if !self.free_slots.wait_for(timeout) {
            return false;
        }

        if let Err(task) = self.queue().push(task) {
            // The free slot guarantees room; keep the counters honest anyway.
            self.free_slots.post();
            drop(task);
            return false;
        }

        backout.disarm();
        self.used_slots.post();
        true
    }

    /// Pops and runs one queued task if one is waiting right now.
    ///
    /// Returns `None` when no task was available.
    fn run_one(&self, timeout: Timeout) -> Option<std::result::Result<(), TaskError>> {
        if !self.used_slots.wait_for(timeout) {
            return None;
        }

        let Some(task) = self.queue().pop() else {
            // Forced wake from `stop`; hand the permit back to a worker.
            self.used_slots.post();
            return None;
        };
        self.free_slots.post();

        let _done = ScopeGuard::new(|| self.tasks.decrement(1));
        Some(task.run())
    }

    /// Worker loop body: runs tasks until the wait on `used_slots` times
    /// out or a forced wake finds the queue empty.
    pub(crate) fn work(&self, timeout: Timeout) -> std::result::Result<(), TaskError> {
        loop {
            if !self.used_slots.wait_for(timeout) {
                return Ok(());
            }

            let Some(task) = self.queue().pop() else {
                return Ok(());
            };
            self.free_slots.post();

            let result = task.run();
            self.tasks.decrement(1);
            result?;
        }
    }

    /// Runs queued tasks on the calling thread while `comp` is busy and
    /// work is immediately available, then blocks on `comp`.
    pub(crate) fn help_while(&self, comp: &Completion) -> Result<()> {
        let mut first_error = None;

        while !comp.done() {
            match self.run_one(Timeout::NONE) {
                None => break,
                Some(Ok(())) => {}
                Some(Err(err)) => {
                    tracing::error!(%err, "task failed on helping thread");
                    first_error.get_or_insert(err);
                }
            }
        }

        comp.wait();

        match first_error {
            Some(err) => Err(Error::Task(err)),
            None => Ok(()),
        }
    }

    pub(crate) fn execute_and_wait_for(
        self: &Arc<Self>,
        task: Task,
        comp: &Completion,
        timeout: Timeout,
    ) -> Result<bool> {
        if !self.execute(task, timeout) {
            return Ok(false);
        }
        self.help_while(comp)?;
        Ok(true)
    }

    pub(crate) fn wait_for(&self, comp: &Completion) -> Result<bool> {
        if self.state() == State::Stopped {
            return Ok(false);
        }
        self.help_while(comp)?;
        Ok(true)
    }

    pub(crate) fn stop(self: &Arc<Self>) -> bool {
        if !self.transition(State::Running, State::Stopping) {
            return false;
        }

        if let Err(Error::Task(err)) = self.help_while(&self.tasks) {
            self.record_failure(err);
        }
        debug_assert!(self.queue().is_empty());

        let workers = self.worker_count();
        self.used_slots.post_n(workers);
        self.threads.wait();

        while self.used_slots.try_wait() {}

        context::leave(self);
        self.state.store(State::Stopped as u8, Ordering::Release);

        tracing::debug!(workers, "thread pool stopped");
        true
    }

    pub(crate) fn worker_exited(&self) {
        self.workers.fetch_sub(1, Ordering::AcqRel);
        self.threads.decrement(1);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // SAFETY: no other reference to the pool remains.
        drop(unsafe { Box::from_raw(*self.queue.get_mut()) });
    }
}

/// Cheap, clonable reference to a thread pool.
///
/// Handles never keep workers alive on their own: once the owning
/// [`ThreadPool`] stops, submissions through a handle are refused.
#[derive(Clone)]
pub struct PoolHandle {
    pub(crate) inner: Arc<Inner>,
}

impl PoolHandle {
    /// Returns the pool associated with the calling thread.
    ///
    /// Worker threads belong to their pool; the thread that started a pool
    /// belongs to it unless it already had one.
    pub fn current() -> Result<PoolHandle> {
        context::current()
            .map(|inner| PoolHandle { inner })
            .ok_or(Error::NoPool)
    }

    /// Submits `task`, waiting at most `timeout` for a free queue slot.
    ///
    /// May start an extra worker first, when every worker already has a task
    /// in flight and the maximum has not been reached. Returns `false` if
    /// the pool is not running, no slot became free in time, or the extra
    /// worker could not be spawned; the task is dropped in that case.
    pub fn execute(&self, task: Task, timeout: Timeout) -> bool {
        self.inner.execute(task, timeout)
    }

    /// Submits `task`, then helps run queued tasks until the pool is idle.
    ///
    /// An error from a task run by this thread while helping is returned
    /// once the wait is over.
    pub fn execute_and_wait(&self, task: Task, timeout: Timeout) -> Result<bool> {
        self.inner
            .execute_and_wait_for(task, &self.inner.tasks, timeout)
    }

    /// Submits `task`, then helps until `comp` reaches zero.
    pub fn execute_and_wait_for(
        &self,
        task: Task,
        comp: &Completion,
        timeout: Timeout,
    ) -> Result<bool> {
        self.inner.execute_and_wait_for(task, comp, timeout)
    }

    /// Helps until every submitted task has finished.
    ///
    /// Returns `Ok(false)` without waiting if the pool is stopped.
    pub fn wait(&self) -> Result<bool> {
        self.inner.wait_for(&self.inner.tasks)
    }

    /// Helps until `comp` reaches zero.
    pub fn wait_for(&self, comp: &Completion) -> Result<bool> {
        self.inner.wait_for(comp)
    }

    pub fn running(&self) -> bool {
        self.inner.running()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.worker_count()
    }

    pub fn task_count(&self) -> usize {
        self.inner.task_count()
    }

    pub fn same_pool(&self, other: &PoolHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("running", &self.running())
            .field("workers", &self.worker_count())
            .field("tasks", &self.task_count())
            .finish()
    }
}

/// A dynamically sized pool of worker threads draining one bounded queue.
///
/// Dropping the pool stops it.
///
/// # Example
/// ```ignore
/// let pool = ThreadPool::builder().min_threads(1).max_threads(4).build();
/// pool.start(1);
/// pool.execute(Task::new(|| println!("hi")), Timeout::Forever);
/// pool.wait()?;
/// ```
pub struct ThreadPool {
    handle: PoolHandle,
}

impl ThreadPool {
    /// Creates a stopped pool with `queue_size` slots and default bounds.
    ///
    /// # Panics
    /// Panics unless `queue_size` is a power of two and at least 8.
    pub fn new(queue_size: usize) -> Self {
        ThreadPoolBuilder::new().queue_size(queue_size).build()
    }

    pub fn builder() -> ThreadPoolBuilder {
        ThreadPoolBuilder::new()
    }

    pub(crate) fn from_inner(inner: Inner) -> Self {
        ThreadPool {
            handle: PoolHandle {
                inner: Arc::new(inner),
            },
        }
    }

    fn inner(&self) -> &Arc<Inner> {
        &self.handle.inner
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Changes the number of queue slots (power of two, at least 8).
    pub fn set_size(&self, size: usize) -> bool {
        self.inner().set_size(size)
    }

    pub fn set_min_threads(&self, n: usize) -> bool {
        self.inner().set_min_threads(n)
    }

    /// Changes the worker ceiling; values below 1 are raised to 1.
    pub fn set_max_threads(&self, n: usize) -> bool {
        self.inner().set_max_threads(n)
    }

    /// Changes how long workers above the minimum wait for work.
    pub fn set_expiration(&self, timeout: Timeout) -> bool {
        self.inner().set_expiration(timeout)
    }

    /// Changes the stack size of workers spawned from now on; 0 means default.
    pub fn set_stack_size(&self, size: usize) -> bool {
        self.inner().set_stack_size(size)
    }

    pub fn size(&self) -> usize {
        self.inner().size()
    }

    pub fn min_threads(&self) -> usize {
        self.inner().min_threads()
    }

    pub fn max_threads(&self) -> usize {
        self.inner().max_threads()
    }

    pub fn expiration(&self) -> Timeout {
        self.inner().expiration()
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.inner().stack_size()
    }

    /// Starts the pool with `count` workers (clamped to the maximum).
    ///
    /// Returns the number of workers started; 0 if the pool was not stopped.
    pub fn start(&self, count: usize) -> usize {
        self.inner().start(count)
    }

    /// Stops the pool: refuses new work, helps drain the queue, then wakes
    /// and waits for every worker.
    ///
    /// Returns `false` if the pool was not running.
    pub fn stop(&self) -> bool {
        self.inner().stop()
    }

    pub fn execute(&self, task: Task, timeout: Timeout) -> bool {
        self.handle.execute(task, timeout)
    }

    pub fn execute_and_wait(&self, task: Task, timeout: Timeout) -> Result<bool> {
        self.handle.execute_and_wait(task, timeout)
    }

    pub fn execute_and_wait_for(
        &self,
        task: Task,
        comp: &Completion,
        timeout: Timeout,
    ) -> Result<bool> {
        self.handle.execute_and_wait_for(task, comp, timeout)
    }

    pub fn wait(&self) -> Result<bool> {
        self.handle.wait()
    }

    pub fn wait_for(&self, comp: &Completion) -> Result<bool> {
        self.handle.wait_for(comp)
    }

    pub fn running(&self) -> bool {
        self.handle.running()
    }

    pub fn worker_count(&self) -> usize {
        self.handle.worker_count()
    }

    pub fn task_count(&self) -> usize {
        self.handle.task_count()
    }

    /// Drains the errors that terminated workers.
    pub fn take_failures(&self) -> Vec<TaskError> {
        self.inner().take_failures()
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        ThreadPoolBuilder::new().build()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.size())
            .field("min_threads", &self.min_threads())
            .field("max_threads", &self.max_threads())
            .field("running", &self.running())
            .field("workers", &self.worker_count())
            .finish()
    }
}
