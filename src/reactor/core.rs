//! The dispatch loop multiplexing timers, signals, platform events,
//! handles and idle work into one blocking call.

use crate::error::{Error, Result};
use crate::reactor::interest::{DispatchFlags, InputMode};
use crate::reactor::poller::{DefaultBackend, EVENT_BATCH, PollBackend, Readiness};
use crate::reactor::signal::{MAX_SIGNALS, SignalMode, SignalRegistry, SignalSet};
use crate::reactor::waker::{ReactorWaker, WakePipe};
use crate::time::Timeout;

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A timer due within this much of now fires without waiting.
pub const TIMER_SLACK: Duration = Duration::from_micros(1);

/// Longest single blocking wait; longer requests are re-armed in a loop.
pub const MAX_WAIT: Duration = Duration::from_secs(86_400);

static NEXT_OWNER: AtomicUsize = AtomicUsize::new(1);

/// Receives the activity found by [`Reactor::dispatch`].
///
/// Every `dispatch_*` method returns whether it handled the activity; `true`
/// makes `dispatch` return, `false` lets the loop look for more.
pub trait Handler {
    /// Due time of the earliest timer, if any.
    fn next_timeout(&mut self) -> Option<Instant> {
        None
    }

    /// Fires the earliest timer; called once it is due.
    fn dispatch_timeout(&mut self, _now: Instant) -> bool {
        false
    }

    fn dispatch_signal(&mut self, _sig: i32) -> bool {
        false
    }

    fn dispatch_handle(&mut self, _fd: RawFd, _mode: InputMode) -> bool {
        false
    }

    /// Called when nothing else is ready, just before blocking.
    fn dispatch_idle(&mut self) -> bool {
        false
    }

    /// True when platform events are queued.
    fn pending_events(&mut self) -> bool {
        false
    }

    fn dispatch_event(&mut self) -> bool {
        false
    }
}

/// Event multiplexing engine over a [`PollBackend`].
///
/// # Example
/// ```ignore
/// let mut reactor = Reactor::new()?;
/// reactor.add_handle(fd, InputMode::READ)?;
/// while !done {
///     reactor.dispatch(&mut handler, Timeout::Forever, DispatchFlags::ALL)?;
/// }
/// ```
pub struct Reactor<B: PollBackend = DefaultBackend> {
    backend: B,
    handles: HashMap<RawFd, InputMode>,
    raised: Vec<Readiness>,
    unserved: usize,
    current: usize,
    pipe: Arc<WakePipe>,
    signals: Box<SignalSet>,
    claimed: u64,
    next_signal: usize,
    registry: &'static SignalRegistry,
    owner: usize,
}

impl Reactor<DefaultBackend> {
    /// Creates a reactor on the platform's default backend, owning signals
    /// through the process-wide registry.
    pub fn new() -> Result<Self> {
        Self::with_backend(DefaultBackend::new()?)
    }
}

impl<B: PollBackend> Reactor<B> {
    pub fn with_backend(backend: B) -> Result<Self> {
        Self::with_registry(backend, SignalRegistry::global())
    }

    /// Creates a reactor owning signals through `registry`.
    pub fn with_registry(mut backend: B, registry: &'static SignalRegistry) -> Result<Self> {
        let pipe = Arc::new(WakePipe::new()?);
        backend.add(pipe.read_fd(), InputMode::READ)?;
        let signals = Box::new(SignalSet::new(pipe.write_fd()));

        Ok(Reactor {
            backend,
            handles: HashMap::new(),
            raised: Vec::with_capacity(EVENT_BATCH),
            unserved: 0,
            current: 0,
            pipe,
            signals,
            claimed: 0,
            next_signal: 0,
            registry,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Handle that interrupts a blocked `dispatch` from another thread.
    pub fn waker(&self) -> ReactorWaker {
        ReactorWaker::new(self.pipe.clone())
    }

    /// Starts watching `fd` for `mode`.
    pub fn add_handle(&mut self, fd: RawFd, mode: InputMode) -> Result<()> {
        if fd < 0 || fd == self.pipe.read_fd() || mode.is_empty() {
            return Err(Error::InvalidHandle(fd));
        }
        if self.handles.contains_key(&fd) {
            return Err(Error::HandleExists(fd));
        }

        self.backend.add(fd, mode)?;
        self.handles.insert(fd, mode);
        tracing::trace!(fd, ?mode, "handle added");
        Ok(())
    }

    /// Changes the watched mode of a registered handle.
    pub fn modify_handle(&mut self, fd: RawFd, mode: InputMode) -> Result<()> {
        if mode.is_empty() {
            return Err(Error::InvalidHandle(fd));
        }
        let Some(watched) = self.handles.get_mut(&fd) else {
            return Err(Error::InvalidHandle(fd));
        };

        self.backend.modify(fd, mode)?;
        *watched = mode;
        tracing::trace!(fd, ?mode, "handle modified");
        Ok(())
    }

    /// Stops watching `fd`; returns `false` if it was not registered.
    ///
    /// Readiness already collected for `fd` is discarded.
    pub fn remove_handle(&mut self, fd: RawFd) -> Result<bool> {
        if self.handles.remove(&fd).is_none() {
            return Ok(false);
        }

        self.backend.remove(fd)?;
        tracing::trace!(fd, "handle removed");
        Ok(true)
    }

    pub fn has_handle(&self, fd: RawFd) -> bool {
        self.handles.contains_key(&fd)
    }

    pub fn handle_mode(&self, fd: RawFd) -> Option<InputMode> {
        self.handles.get(&fd).copied()
    }

    /// Claims `sig` for this reactor.
    ///
    /// Fails with [`Error::SignalOwned`] if another reactor holds it.
    pub fn add_signal(&mut self, sig: i32, mode: SignalMode) -> Result<()> {
        self.registry
            .claim(sig, self.owner, &self.signals, mode)?;
        self.claimed |= 1u64 << sig;
        tracing::trace!(sig, ?mode, "signal claimed");
        Ok(())
    }

    /// Releases `sig`; returns `false` if this reactor did not hold it.
    pub fn remove_signal(&mut self, sig: i32) -> bool {
        if !self.has_signal(sig) || !self.registry.release(sig, self.owner) {
            return false;
        }

        self.claimed &= !(1u64 << sig);
        self.signals.clear(sig as usize);
        tracing::trace!(sig, "signal released");
        true
    }

    pub fn has_signal(&self, sig: i32) -> bool {
        (1..MAX_SIGNALS as i32).contains(&sig) && self.claimed & (1u64 << sig) != 0
    }

    /// Releases every claimed signal and stops watching every handle.
    ///
    /// Runs on drop as well.
    pub fn exit(&mut self) {
        for sig in 1..MAX_SIGNALS as i32 {
            if self.has_signal(sig) {
                self.remove_signal(sig);
            }
        }

        for fd in std::mem::take(&mut self.handles).into_keys() {
            if let Err(err) = self.backend.remove(fd) {
                tracing::debug!(fd, %err, "failed to stop watching handle");
            }
        }

        self.raised.clear();
        self.unserved = 0;
    }

    /// Waits for and dispatches activity to `handler`.
    ///
    /// Loops until a `dispatch_*` call returns `true` (then returns
    /// `Ok(true)`), the blocking budget runs out, or a [`ReactorWaker`]
    /// interrupts the wait (both return `Ok(false)`). Sources are checked
    /// in order: due timers, pending signals, platform events, one raised
    /// handle, and finally idle work right before blocking.
    ///
    /// A wait failure other than an interrupt returns [`Error::Fatal`].
    pub fn dispatch<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
        blocking: Timeout,
        flags: DispatchFlags,
    ) -> Result<bool> {
        let deadline = blocking.deadline_from(Instant::now());
        // Set once every handle raised by the last poll was offered and none
        // claimed it. Level-triggered handles would be raised again at once,
        // so the next round goes through idle and the budget check first.
        let mut offered = false;

        loop {
            let mut next_due = None;
            if flags.contains(DispatchFlags::TIMERS) {
                if let Some(due) = handler.next_timeout() {
                    let now = Instant::now();
                    if due <= now + TIMER_SLACK {
                        if handler.dispatch_timeout(now) {
                            return Ok(true);
                        }
                        continue;
                    }
                    next_due = Some(due);
                }
            }

            if flags.contains(DispatchFlags::SIGNALS) {
                if let Some(sig) = self.signals.take_from(self.next_signal) {
                    self.next_signal = (sig as usize + 1) % MAX_SIGNALS;
                    if handler.dispatch_signal(sig) {
                        return Ok(true);
                    }
                    continue;
                }
            }

            if flags.contains(DispatchFlags::EVENTS) && handler.pending_events() {
                if handler.dispatch_event() {
                    return Ok(true);
                }
                continue;
            }

            if self.unserved > 0 {
                self.unserved -= 1;
                self.current = (self.current + 1) % self.raised.len();
                let Readiness { fd, mode } = self.raised[self.current];

                // Skip handles removed or re-moded since the poll.
                let watched = self.handles.get(&fd).copied().unwrap_or_default();
                let mode = mode & (watched | InputMode::EXCEPT);
                offered = true;
                if watched.is_empty() || mode.is_empty() {
                    continue;
                }

                if flags.contains(DispatchFlags::OTHER) && handler.dispatch_handle(fd, mode) {
                    return Ok(true);
                }
                continue;
            }

            if !std::mem::take(&mut offered) {
                match self.poll(Some(Duration::ZERO))? {
                    Polled::Woken => return Ok(false),
                    Polled::Rearmed => continue,
                    Polled::Ready if flags.contains(DispatchFlags::OTHER) => continue,
                    Polled::Ready => self.unserved = 0,
                    Polled::Nothing => {}
                }
            }

            if flags.contains(DispatchFlags::IDLE) && handler.dispatch_idle() {
                return Ok(true);
            }

            let now = Instant::now();
            let mut interval = MAX_WAIT;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(now);
                if remaining.is_zero() {
                    return Ok(false);
                }
                interval = interval.min(remaining);
            }
            if let Some(due) = next_due {
                interval = interval.min(due.saturating_duration_since(now));
            }

            if let Polled::Woken = self.poll(Some(interval))? {
                return Ok(false);
            }
        }
    }

    fn poll(&mut self, timeout: Option<Duration>) -> Result<Polled> {
        self.raised.clear();
        self.unserved = 0;

        match self.backend.wait(&mut self.raised, timeout) {
            Ok(_) => {}
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                return Ok(Polled::Nothing);
            }
            Err(err) => {
                tracing::error!(%err, "reactor wait failed");
                return Err(Error::Fatal(err));
            }
        }

        let wake_fd = self.pipe.read_fd();
        let wake = self.raised.iter().position(|r| r.fd == wake_fd);
        if let Some(index) = wake {
            self.raised.remove(index);
        }

        self.unserved = self.raised.len();
        if self.unserved > 0 {
            // Start one past where the previous round started.
            self.current = (self.current + 1) % self.unserved;
        }

        if wake.is_some() {
            self.signals.rearm();
            if self.pipe.reset() {
                // Raised handles stay queued for the next call.
                return Ok(Polled::Woken);
            }
            // A drained pipe means a signal may now be pending.
            return Ok(Polled::Rearmed);
        }

        if self.unserved > 0 {
            Ok(Polled::Ready)
        } else {
            Ok(Polled::Nothing)
        }
    }
}

enum Polled {
    Nothing,
    /// Handles are ready.
    Ready,
    /// The wake pipe was drained for signals.
    Rearmed,
    /// A `ReactorWaker` asked `dispatch` to return.
    Woken,
}

impl<B: PollBackend> Drop for Reactor<B> {
    fn drop(&mut self) {
        self.exit();
        if let Err(err) = self.backend.remove(self.pipe.read_fd()) {
            tracing::debug!(%err, "failed to stop watching wake pipe");
        }
    }
}
