//! Dynamically sized worker pool, task groups and fork-join helpers.

pub mod builder;
pub(crate) mod context;
mod core;
pub mod group;
pub mod parallel;
pub mod task;
mod worker;

pub use builder::ThreadPoolBuilder;
pub use self::core::{DEFAULT_QUEUE_SIZE, PoolHandle, ThreadPool};
pub use group::TaskGroup;
pub use parallel::{MAX_CHUNKS, parallel_for, parallel_invoke};
pub use task::{Runnable, Task};
