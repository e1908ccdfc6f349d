//! Callback dispatchers built on the reactor.
//!
//! - [`Dispatcher`]: handle, timer, signal and idle callbacks
//! - [`EventDispatcher`]: adds a coalesced platform event stream
//! - [`MessageChannel`]: cross-thread messages run on the dispatcher thread

pub mod channel;
mod core;
pub mod event;
mod idle;
mod timer;

pub use self::core::{Dispatcher, HandleCallback, SignalCallback};
pub use channel::{MessageChannel, MessageSender};
pub use event::{EventDispatcher, PlatformEvent, PlatformSource, QueuedSource, WindowId};
pub use idle::{IdleCallback, IdleId};
pub use timer::{TimerCallback, TimerId};
