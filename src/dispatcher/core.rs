//! Callback-based dispatcher on top of [`Reactor`].

use crate::dispatcher::idle::{IdleCallback, IdleId, IdleQueue};
use crate::dispatcher::timer::{TimerCallback, TimerId, TimerList};
use crate::error::Result;
use crate::reactor::{
    DefaultBackend, DispatchFlags, Handler, InputMode, MAX_SIGNALS, PollBackend, Reactor,
    ReactorWaker, SignalMode, SignalRegistry,
};
use crate::time::Timeout;

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

pub type HandleCallback = Box<dyn FnMut(RawFd, InputMode) -> bool>;
pub type SignalCallback = Box<dyn FnMut(i32) -> bool>;

/// Everything registered with a [`Dispatcher`], kept apart from the reactor
/// so the two can be borrowed separately during `dispatch`.
pub(crate) struct Callbacks {
    handles: HashMap<RawFd, HandleCallback>,
    timers: TimerList,
    signals: [Option<SignalCallback>; MAX_SIGNALS],
    idle: IdleQueue,
}

impl Callbacks {
    fn new() -> Self {
        Callbacks {
            handles: HashMap::new(),
            timers: TimerList::new(),
            signals: std::array::from_fn(|_| None),
            idle: IdleQueue::new(),
        }
    }
}

impl Handler for Callbacks {
    fn next_timeout(&mut self) -> Option<Instant> {
        self.timers.next_due()
    }

    fn dispatch_timeout(&mut self, now: Instant) -> bool {
        self.timers.fire(now)
    }

    fn dispatch_signal(&mut self, sig: i32) -> bool {
        match self.signals.get_mut(sig as usize) {
            Some(Some(callback)) => callback(sig),
            _ => false,
        }
    }

    fn dispatch_handle(&mut self, fd: RawFd, mode: InputMode) -> bool {
        match self.handles.get_mut(&fd) {
            Some(callback) => callback(fd, mode),
            None => false,
        }
    }

    fn dispatch_idle(&mut self) -> bool {
        self.idle.run_next()
    }
}

/// Runs callbacks registered for handles, timers, signals and idle time.
///
/// Callbacks return whether they handled the activity; the first one that
/// returns `true` ends the current [`dispatch`](Dispatcher::dispatch).
///
/// # Example
/// ```ignore
/// let mut dispatcher = Dispatcher::new()?;
/// dispatcher.add_timeout(|_| { println!("tick"); true }, Duration::from_millis(50));
/// dispatcher.add_signal(libc::SIGINT, |_| { stop.set(true); true })?;
///
/// while !stop.get() {
///     dispatcher.dispatch(Timeout::Forever, DispatchFlags::ALL)?;
/// }
/// ```
pub struct Dispatcher<B: PollBackend = DefaultBackend> {
    reactor: Reactor<B>,
    callbacks: Callbacks,
}

impl Dispatcher<DefaultBackend> {
    pub fn new() -> Result<Self> {
        Ok(Self::from_reactor(Reactor::new()?))
    }
}

impl<B: PollBackend> Dispatcher<B> {
    pub fn with_backend(backend: B) -> Result<Self> {
        Ok(Self::from_reactor(Reactor::with_backend(backend)?))
    }

    /// Creates a dispatcher whose signals are owned through `registry`.
    pub fn with_registry(backend: B, registry: &'static SignalRegistry) -> Result<Self> {
        Ok(Self::from_reactor(Reactor::with_registry(backend, registry)?))
    }

    pub fn from_reactor(reactor: Reactor<B>) -> Self {
        Dispatcher {
            reactor,
            callbacks: Callbacks::new(),
        }
    }

    pub fn reactor(&self) -> &Reactor<B> {
        &self.reactor
    }

    pub fn waker(&self) -> ReactorWaker {
        self.reactor.waker()
    }

    /// Calls `callback` whenever `fd` is ready for `mode`.
    pub fn add_handle<F>(&mut self, fd: RawFd, mode: InputMode, callback: F) -> Result<()>
    where
        F: FnMut(RawFd, InputMode) -> bool + 'static,
    {
        self.reactor.add_handle(fd, mode)?;
        self.callbacks.handles.insert(fd, Box::new(callback));
        Ok(())
    }

    pub fn modify_handle(&mut self, fd: RawFd, mode: InputMode) -> Result<()> {
        self.reactor.modify_handle(fd, mode)
    }

    /// Stops watching `fd` and hands back its callback.
    pub fn remove_handle(&mut self, fd: RawFd) -> Option<HandleCallback> {
        if let Err(err) = self.reactor.remove_handle(fd) {
            tracing::warn!(fd, %err, "failed to stop watching handle");
        }
        self.callbacks.handles.remove(&fd)
    }

    pub fn has_handle(&self, fd: RawFd) -> bool {
        self.callbacks.handles.contains_key(&fd)
    }

    /// Runs `callback` once, `delay` from now.
    pub fn add_timeout<F>(&mut self, callback: F, delay: Duration) -> TimerId
    where
        F: FnMut(Instant) -> bool + 'static,
    {
        self.add_timeout_at(callback, Instant::now() + delay)
    }

    /// Runs `callback` once at `due`.
    pub fn add_timeout_at<F>(&mut self, callback: F, due: Instant) -> TimerId
    where
        F: FnMut(Instant) -> bool + 'static,
    {
        self.callbacks.timers.insert(Box::new(callback), due, None)
    }

    /// Runs `callback` every `period`, starting one period from now.
    pub fn add_interval<F>(&mut self, callback: F, period: Duration) -> TimerId
    where
        F: FnMut(Instant) -> bool + 'static,
    {
        let due = Instant::now() + period;
        self.callbacks
            .timers
            .insert(Box::new(callback), due, Some(period))
    }

    pub fn remove_timeout(&mut self, id: TimerId) -> Option<TimerCallback> {
        self.callbacks.timers.remove(id)
    }

    pub fn has_timeout(&self, id: TimerId) -> bool {
        self.callbacks.timers.contains(id)
    }

    /// Time left until the timer fires, or `None` once it is gone.
    pub fn remaining(&self, id: TimerId) -> Option<Duration> {
        self.callbacks.timers.remaining(id, Instant::now())
    }

    pub fn timer_count(&self) -> usize {
        self.callbacks.timers.len()
    }

    /// Claims `sig` and runs `callback` from `dispatch` whenever it arrives.
    pub fn add_signal<F>(&mut self, sig: i32, callback: F) -> Result<()>
    where
        F: FnMut(i32) -> bool + 'static,
    {
        self.reactor.add_signal(sig, SignalMode::Deferred)?;
        self.callbacks.signals[sig as usize] = Some(Box::new(callback));
        Ok(())
    }

    /// Claims `sig` and runs `hook` inside the OS signal handler.
    ///
    /// `hook` must restrict itself to async-signal-safe work.
    pub fn add_signal_immediate(&mut self, sig: i32, hook: fn(i32)) -> Result<()> {
        self.reactor.add_signal(sig, SignalMode::Immediate(hook))?;
        self.callbacks.signals[sig as usize] = None;
        Ok(())
    }

    /// Releases `sig`; returns the deferred callback if one was set.
    pub fn remove_signal(&mut self, sig: i32) -> Option<SignalCallback> {
        if !self.reactor.remove_signal(sig) {
            return None;
        }
        self.callbacks.signals.get_mut(sig as usize)?.take()
    }

    pub fn has_signal(&self, sig: i32) -> bool {
        self.reactor.has_signal(sig)
    }

    /// Queues `callback` to run once the next time the dispatcher is idle.
    pub fn add_idle<F>(&mut self, callback: F) -> IdleId
    where
        F: FnMut() -> bool + 'static,
    {
        self.callbacks.idle.push(Box::new(callback))
    }

    pub fn remove_idle(&mut self, id: IdleId) -> Option<IdleCallback> {
        self.callbacks.idle.remove(id)
    }

    pub fn has_idle(&self, id: IdleId) -> bool {
        self.callbacks.idle.contains(id)
    }

    pub fn idle_count(&self) -> usize {
        self.callbacks.idle.len()
    }

    /// Waits for activity and runs the matching callbacks.
    ///
    /// See [`Reactor::dispatch`] for the order sources are checked in.
    pub fn dispatch(&mut self, blocking: Timeout, flags: DispatchFlags) -> Result<bool> {
        self.reactor.dispatch(&mut self.callbacks, blocking, flags)
    }

    /// Split borrow for wrappers layering another [`Handler`] on top.
    pub(crate) fn parts(&mut self) -> (&mut Reactor<B>, &mut Callbacks) {
        (&mut self.reactor, &mut self.callbacks)
    }

    pub(crate) fn reactor_mut(&mut self) -> &mut Reactor<B> {
        &mut self.reactor
    }
}

impl<B: PollBackend> fmt::Debug for Dispatcher<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handles", &self.callbacks.handles.len())
            .field("timers", &self.callbacks.timers)
            .field("idle", &self.callbacks.idle.len())
            .finish_non_exhaustive()
    }
}
