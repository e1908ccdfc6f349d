//! Event multiplexing reactor.
//!
//! - [`core`]: the dispatch loop and the [`Handler`] trait
//! - [`interest`]: input modes and dispatch flags
//! - [`poller`]: epoll, kqueue and poll(2) backends
//! - [`signal`]: signal ownership and delivery
//! - [`waker`]: cross-thread wakeups

pub mod core;
pub mod interest;
pub mod poller;
pub mod signal;
pub(crate) mod waker;

pub use self::core::{Handler, MAX_WAIT, Reactor, TIMER_SLACK};
pub use interest::{DispatchFlags, InputMode};
pub use poller::{DefaultBackend, PollBackend, PollSetBackend, Readiness};
pub use signal::{MAX_SIGNALS, SignalMode, SignalRegistry};
pub use waker::ReactorWaker;
