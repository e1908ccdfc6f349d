//! Concurrency and event-dispatch runtime built directly on OS threads and
//! readiness polling.
//!
//! # Architecture
//!
//! - **sync**: atomics helpers, semaphore, condition variable and the
//!   completion counter everything else waits on
//! - **queue**: lock-free MPMC ring, semaphore-guarded SPSC ring and a
//!   Chase-Lev work-stealing deque
//! - **pool**: elastic thread pool, task groups and the parallel
//!   `invoke`/`for` helpers
//! - **reactor**: poll backends, signal ownership and the dispatch loop
//! - **dispatcher**: callback registration for handles, timers, signals,
//!   idle work, platform events and cross-thread messages
//!
//! Every blocking call takes an explicit [`Timeout`].

mod error;
pub mod dispatcher;
pub mod pool;
pub mod queue;
pub mod reactor;
pub mod sync;
pub mod time;
mod utils;

pub use dispatcher::{Dispatcher, EventDispatcher, MessageChannel, MessageSender};
pub use error::{Error, Result, TaskError};
pub use pool::{PoolHandle, Task, TaskGroup, ThreadPool, ThreadPoolBuilder};
pub use queue::LfQueue;
pub use reactor::{DispatchFlags, InputMode, Reactor, SignalRegistry};
pub use sync::{Completion, Semaphore};
pub use time::Timeout;
