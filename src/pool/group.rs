//! Fork-join groups of tasks sharing one thread pool.

use crate::error::{Error, Result, TaskError};
use crate::pool::core::PoolHandle;
use crate::pool::task::{Runnable, Task};
use crate::sync::Completion;
use crate::time::Timeout;

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

struct GroupState {
    completion: Completion,
    first_error: Mutex<Option<TaskError>>,
}

impl GroupState {
    fn record(&self, err: &TaskError) {
        self.first_error.lock().get_or_insert_with(|| err.clone());
    }
}

/// Wraps a task so the group's counter is held from creation until drop.
///
/// The count is released whether the task ran, failed, panicked, or was
/// refused by the pool and dropped unrun.
struct GroupTask {
    state: Arc<GroupState>,
    task: Option<Task>,
}

impl GroupTask {
    fn new(state: Arc<GroupState>, task: Task) -> Self {
        state.completion.increment(1);
        GroupTask {
            state,
            task: Some(task),
        }
    }
}

impl Runnable for GroupTask {
    fn run(mut self: Box<Self>) -> std::result::Result<(), TaskError> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        let result = task.run();
        if let Err(err) = &result {
            self.state.record(err);
        }
        result
    }
}

impl Drop for GroupTask {
    fn drop(&mut self) {
        // The wrapped work goes first: whoever waits on the group may free
        // what it borrows as soon as the count drops.
        drop(self.task.take());
        self.state.completion.decrement(1);
    }
}

/// A set of tasks whose joint completion can be awaited on its own,
/// independently of other work in the same pool.
///
/// Dropping a group waits for all of its tasks.
///
/// # Example
/// ```ignore
/// let group = TaskGroup::new(&pool.handle());
/// for part in parts {
///     group.execute(Task::new(move || process(part)));
/// }
/// group.wait()?;
/// ```
pub struct TaskGroup {
    pool: PoolHandle,
    state: Arc<GroupState>,
}

impl TaskGroup {
    pub fn new(pool: &PoolHandle) -> Self {
        TaskGroup {
            pool: pool.clone(),
            state: Arc::new(GroupState {
                completion: Completion::new(),
                first_error: Mutex::new(None),
            }),
        }
    }

    /// Creates a group on the calling thread's pool.
    pub fn current() -> Result<Self> {
        PoolHandle::current().map(|pool| Self::new(&pool))
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    fn wrap(&self, task: Task) -> Task {
        Task::from_runnable(GroupTask::new(self.state.clone(), task))
    }

    /// Submits `task` as part of this group, waiting for a queue slot.
    pub fn execute(&self, task: Task) -> bool {
        self.pool.execute(self.wrap(task), Timeout::Forever)
    }

    /// Submits `task`, then helps until every task of this group is done.
    pub fn execute_and_wait(&self, task: Task) -> Result<bool> {
        let helped = self
            .pool
            .execute_and_wait_for(self.wrap(task), &self.state.completion, Timeout::Forever);
        self.finish(helped)
    }

    /// Helps until every task of this group is done.
    ///
    /// Returns the first error raised by one of the group's tasks.
    pub fn wait(&self) -> Result<()> {
        let helped = self.pool.wait_for(&self.state.completion);
        // A stopped pool does not wait; whoever still runs our tasks does.
        self.state.completion.wait();
        self.finish(helped).map(|_| ())
    }

    fn finish(&self, helped: Result<bool>) -> Result<bool> {
        if let Some(err) = self.state.first_error.lock().take() {
            return Err(Error::Task(err));
        }
        helped
    }

    /// Tasks of this group not yet finished.
    pub fn count(&self) -> usize {
        self.state.completion.count() as usize
    }

    pub fn done(&self) -> bool {
        self.state.completion.done()
    }
}

impl Drop for TaskGroup {
    fn drop(&mut self) {
        if let Err(err) = self.wait() {
            tracing::error!(%err, "task group dropped with an unobserved failure");
        }
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("count", &self.count())
            .field("pool", &self.pool)
            .finish()
    }
}
