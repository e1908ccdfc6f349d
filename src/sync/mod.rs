//! Blocking and atomic primitives the pool and queues are built on.
//!
//! - [`atomic`]: fences and spin-waiting over std atomics
//! - [`condition`]: condition variable with timed waits
//! - [`semaphore`]: counting semaphore
//! - [`completion`]: "N activities in flight" counter with a gate

pub mod atomic;
pub mod completion;
pub mod condition;
pub mod semaphore;

pub use completion::Completion;
pub use condition::Condition;
pub use semaphore::Semaphore;
