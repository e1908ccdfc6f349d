//! Dispatcher extension for a windowing system's event stream.
//!
//! The source's events are coalesced before they reach the handler so a
//! slow handler sees one motion, one wheel turn or one resize instead of a
//! backlog of them.

use crate::dispatcher::core::{Callbacks, Dispatcher};
use crate::error::Result;
use crate::reactor::{DefaultBackend, DispatchFlags, Handler, InputMode, PollBackend};
use crate::time::Timeout;

use std::collections::VecDeque;
use std::fmt;
use std::os::unix::io::RawFd;
use std::time::Instant;

pub type WindowId = u64;

/// Buttons reported for wheel turns.
pub const WHEEL_UP: u8 = 4;
pub const WHEEL_DOWN: u8 = 5;

/// One event from the windowing system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    Motion {
        window: WindowId,
        x: i32,
        y: i32,
        state: u32,
    },
    ButtonPress {
        window: WindowId,
        button: u8,
        x: i32,
        y: i32,
        state: u32,
    },
    ButtonRelease {
        window: WindowId,
        button: u8,
        x: i32,
        y: i32,
        state: u32,
    },
    /// Coalesced wheel presses; only produced by coalescing.
    Wheel {
        window: WindowId,
        button: u8,
        ticks: u32,
        x: i32,
        y: i32,
        state: u32,
    },
    Configure {
        window: WindowId,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        synthetic: bool,
    },
    Other {
        window: WindowId,
        kind: u32,
        detail: u64,
    },
}

impl PlatformEvent {
    pub fn window(&self) -> WindowId {
        match *self {
            PlatformEvent::Motion { window, .. }
            | PlatformEvent::ButtonPress { window, .. }
            | PlatformEvent::ButtonRelease { window, .. }
            | PlatformEvent::Wheel { window, .. }
            | PlatformEvent::Configure { window, .. }
            | PlatformEvent::Other { window, .. } => window,
        }
    }
}

/// A windowing-system connection delivering [`PlatformEvent`]s.
pub trait PlatformSource {
    /// Descriptor that turns readable when events arrive, if any.
    fn connection_fd(&self) -> Option<RawFd> {
        None
    }

    /// Reads what the connection has buffered; true when events are queued.
    fn pending(&mut self) -> bool;

    fn peek(&self) -> Option<&PlatformEvent>;

    fn next_event(&mut self) -> Option<PlatformEvent>;
}

/// In-process event source fed with [`push`](QueuedSource::push).
#[derive(Debug, Default)]
pub struct QueuedSource {
    events: VecDeque<PlatformEvent>,
}

impl QueuedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: PlatformEvent) {
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl PlatformSource for QueuedSource {
    fn pending(&mut self) -> bool {
        !self.events.is_empty()
    }

    fn peek(&self) -> Option<&PlatformEvent> {
        self.events.front()
    }

    fn next_event(&mut self) -> Option<PlatformEvent> {
        self.events.pop_front()
    }
}

/// Takes the next event off `source`, folding the run of events it
/// summarises into it.
pub fn next_coalesced<S: PlatformSource + ?Sized>(source: &mut S) -> Option<PlatformEvent> {
    let mut event = source.next_event()?;

    match event {
        PlatformEvent::Motion { window, state, .. } => {
            while let Some(PlatformEvent::Motion {
                window: w,
                state: s,
                ..
            }) = source.peek()
            {
                if *w != window || *s != state {
                    break;
                }
                match source.next_event() {
                    Some(next) => event = next,
                    None => break,
                }
            }
        }

        PlatformEvent::ButtonPress {
            window,
            button,
            x,
            y,
            state,
        } if button == WHEEL_UP || button == WHEEL_DOWN => {
            let (mut ticks, mut x, mut y, mut state) = (1, x, y, state);
            loop {
                let (pressed, w, b) = match source.peek() {
                    Some(PlatformEvent::ButtonPress { window, button, .. }) => (true, *window, *button),
                    Some(PlatformEvent::ButtonRelease { window, button, .. }) => (false, *window, *button),
                    _ => break,
                };
                if w != window || b != button {
                    break;
                }
                match source.next_event() {
                    Some(
                        PlatformEvent::ButtonPress { x: nx, y: ny, state: ns, .. }
                        | PlatformEvent::ButtonRelease { x: nx, y: ny, state: ns, .. },
                    ) => {
                        (x, y, state) = (nx, ny, ns);
                    }
                    _ => break,
                }
                ticks += u32::from(pressed);
            }

            event = PlatformEvent::Wheel {
                window,
                button,
                ticks,
                x,
                y,
                state,
            };
        }

        PlatformEvent::Configure {
            window,
            ref mut x,
            ref mut y,
            ref mut width,
            ref mut height,
            ..
        } => {
            while let Some(PlatformEvent::Configure { window: w, .. }) = source.peek() {
                if *w != window {
                    break;
                }
                let Some(PlatformEvent::Configure {
                    x: nx,
                    y: ny,
                    width: nw,
                    height: nh,
                    synthetic,
                    ..
                }) = source.next_event()
                else {
                    break;
                };
                (*width, *height) = (nw, nh);
                if synthetic {
                    (*x, *y) = (nx, ny);
                }
            }
        }

        _ => {}
    }

    Some(event)
}

pub type EventCallback = Box<dyn FnMut(PlatformEvent) -> bool>;

struct EventHandler<'a, S> {
    callbacks: &'a mut Callbacks,
    source: &'a mut S,
    on_event: &'a mut Option<EventCallback>,
    connection: Option<RawFd>,
}

impl<S: PlatformSource> Handler for EventHandler<'_, S> {
    fn next_timeout(&mut self) -> Option<Instant> {
        self.callbacks.next_timeout()
    }

    fn dispatch_timeout(&mut self, now: Instant) -> bool {
        self.callbacks.dispatch_timeout(now)
    }

    fn dispatch_signal(&mut self, sig: i32) -> bool {
        self.callbacks.dispatch_signal(sig)
    }

    fn dispatch_handle(&mut self, fd: RawFd, mode: InputMode) -> bool {
        // Connection readiness is picked up through `pending_events`.
        if Some(fd) == self.connection {
            return false;
        }
        self.callbacks.dispatch_handle(fd, mode)
    }

    fn dispatch_idle(&mut self) -> bool {
        self.callbacks.dispatch_idle()
    }

    fn pending_events(&mut self) -> bool {
        self.source.pending()
    }

    fn dispatch_event(&mut self) -> bool {
        let Some(event) = next_coalesced(&mut *self.source) else {
            return false;
        };
        match self.on_event.as_mut() {
            Some(callback) => callback(event),
            None => false,
        }
    }
}

/// A [`Dispatcher`] that also delivers coalesced platform events.
///
/// # Example
/// ```ignore
/// let mut events = EventDispatcher::new(connection)?;
/// events.set_event_handler(|event| {
///     println!("{event:?}");
///     true
/// });
/// events.dispatcher_mut().add_interval(|_| { redraw(); false }, frame);
/// loop {
///     events.dispatch(Timeout::Forever, DispatchFlags::ALL)?;
/// }
/// ```
pub struct EventDispatcher<S: PlatformSource, B: PollBackend = DefaultBackend> {
    dispatcher: Dispatcher<B>,
    source: S,
    on_event: Option<EventCallback>,
    connection: Option<RawFd>,
}

impl<S: PlatformSource> EventDispatcher<S, DefaultBackend> {
    pub fn new(source: S) -> Result<Self> {
        Self::with_dispatcher(Dispatcher::new()?, source)
    }
}

impl<S: PlatformSource, B: PollBackend> EventDispatcher<S, B> {
    /// Wraps `dispatcher`, watching the source's connection for reads.
    pub fn with_dispatcher(mut dispatcher: Dispatcher<B>, source: S) -> Result<Self> {
        let connection = source.connection_fd();
        if let Some(fd) = connection {
            dispatcher.reactor_mut().add_handle(fd, InputMode::READ)?;
        }

        Ok(EventDispatcher {
            dispatcher,
            source,
            on_event: None,
            connection,
        })
    }

    /// Sets the callback receiving coalesced events; events arriving while
    /// none is set are dropped.
    pub fn set_event_handler<F>(&mut self, handler: F)
    where
        F: FnMut(PlatformEvent) -> bool + 'static,
    {
        self.on_event = Some(Box::new(handler));
    }

    pub fn clear_event_handler(&mut self) -> Option<EventCallback> {
        self.on_event.take()
    }

    pub fn dispatcher(&self) -> &Dispatcher<B> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<B> {
        &mut self.dispatcher
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn dispatch(&mut self, blocking: Timeout, flags: DispatchFlags) -> Result<bool> {
        let (reactor, callbacks) = self.dispatcher.parts();
        let mut handler = EventHandler {
            callbacks,
            source: &mut self.source,
            on_event: &mut self.on_event,
            connection: self.connection,
        };
        reactor.dispatch(&mut handler, blocking, flags)
    }
}

impl<S: PlatformSource, B: PollBackend> fmt::Debug for EventDispatcher<S, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("dispatcher", &self.dispatcher)
            .field("connection", &self.connection)
            .field("has_handler", &self.on_event.is_some())
            .finish()
    }
}
