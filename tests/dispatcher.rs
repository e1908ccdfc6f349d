mod common;

use evcore::dispatcher::PlatformEvent;
use evcore::dispatcher::{PlatformSource, QueuedSource};
use evcore::reactor::{DefaultBackend, PollBackend, PollSetBackend};
use evcore::{
    DispatchFlags, Dispatcher, Error, EventDispatcher, InputMode, MessageChannel, Timeout,
};
use rstest::rstest;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn poll_set() -> Box<dyn PollBackend> {
    Box::new(PollSetBackend::new().unwrap())
}

fn native() -> Box<dyn PollBackend> {
    Box::new(DefaultBackend::new().unwrap())
}

fn isolated(backend: fn() -> Box<dyn PollBackend>) -> Dispatcher<Box<dyn PollBackend>> {
    Dispatcher::with_registry(backend(), common::isolated_registry()).unwrap()
}

#[rstest]
#[case::poll_set(poll_set as fn() -> Box<dyn PollBackend>)]
#[case::native(native as fn() -> Box<dyn PollBackend>)]
fn test_earlier_timer_fires_on_first_dispatch(#[case] backend: fn() -> Box<dyn PollBackend>) {
    common::init_test_logging();
    let mut dispatcher = isolated(backend);
    let fired = Rc::new(RefCell::new(Vec::new()));

    let log = fired.clone();
    dispatcher.add_timeout(
        move |_| {
            log.borrow_mut().push("10ms");
            true
        },
        Duration::from_millis(10),
    );
    let log = fired.clone();
    dispatcher.add_timeout(
        move |_| {
            log.borrow_mut().push("5ms");
            true
        },
        Duration::from_millis(5),
    );

    let start = Instant::now();
    assert!(dispatcher.dispatch(Timeout::Forever, DispatchFlags::ALL).unwrap());
    assert_eq!(*fired.borrow(), ["5ms"]);
    assert!(dispatcher.dispatch(Timeout::Forever, DispatchFlags::ALL).unwrap());
    assert_eq!(*fired.borrow(), ["5ms", "10ms"]);
    assert!(start.elapsed() >= Duration::from_millis(10));
}

#[test]
fn test_interval_keeps_firing_until_removed() {
    let mut dispatcher = isolated(poll_set);
    let ticks = Rc::new(Cell::new(0));

    let t = ticks.clone();
    let id = dispatcher.add_interval(
        move |_| {
            t.set(t.get() + 1);
            true
        },
        Duration::from_millis(2),
    );

    for _ in 0..3 {
        assert!(dispatcher.dispatch(Timeout::Forever, DispatchFlags::ALL).unwrap());
    }
    assert_eq!(ticks.get(), 3);
    assert!(dispatcher.has_timeout(id));

    assert!(dispatcher.remove_timeout(id).is_some());
    assert!(!dispatcher.dispatch(Timeout::from_millis(10), DispatchFlags::ALL).unwrap());
    assert_eq!(ticks.get(), 3);
}

#[rstest]
#[case::poll_set(poll_set as fn() -> Box<dyn PollBackend>)]
#[case::native(native as fn() -> Box<dyn PollBackend>)]
fn test_ready_handles_are_served_round_robin(#[case] backend: fn() -> Box<dyn PollBackend>) {
    let mut dispatcher = isolated(backend);
    let (a_read, a_write) = common::pipe();
    let (b_read, b_write) = common::pipe();
    let served = Rc::new(RefCell::new(Vec::new()));

    for fd in [a_read, b_read] {
        let served = served.clone();
        dispatcher
            .add_handle(fd, InputMode::READ, move |fd, mode| {
                assert!(mode.contains(InputMode::READ));
                served.borrow_mut().push(fd);
                true
            })
            .unwrap();
    }

    // Nothing is read back, so both stay ready.
    common::write_byte(a_write);
    common::write_byte(b_write);
    for _ in 0..4 {
        assert!(dispatcher.dispatch(Timeout::from_millis(500), DispatchFlags::ALL).unwrap());
    }

    let served = served.borrow();
    assert_eq!(served.iter().filter(|fd| **fd == a_read).count(), 2);
    assert_eq!(served.iter().filter(|fd| **fd == b_read).count(), 2);
    assert_ne!(served[0], served[1]);

    drop(dispatcher);
    common::close(&[a_read, a_write, b_read, b_write]);
}

#[test]
fn test_handle_registration_errors() {
    let mut dispatcher = isolated(poll_set);
    let (read, write) = common::pipe();

    assert!(matches!(
        dispatcher.add_handle(-1, InputMode::READ, |_, _| true),
        Err(Error::InvalidHandle(-1))
    ));
    dispatcher.add_handle(read, InputMode::READ, |_, _| true).unwrap();
    assert!(matches!(
        dispatcher.add_handle(read, InputMode::WRITE, |_, _| true),
        Err(Error::HandleExists(fd)) if fd == read
    ));

    dispatcher.modify_handle(read, InputMode::READ | InputMode::EXCEPT).unwrap();
    assert!(dispatcher.remove_handle(read).is_some());
    assert!(!dispatcher.has_handle(read));

    drop(dispatcher);
    common::close(&[read, write]);
}

#[test]
fn test_removed_handle_is_not_dispatched() {
    let mut dispatcher = isolated(poll_set);
    let (read, write) = common::pipe();
    let hits = Rc::new(Cell::new(0));

    let h = hits.clone();
    dispatcher
        .add_handle(read, InputMode::READ, move |_, _| {
            h.set(h.get() + 1);
            true
        })
        .unwrap();
    common::write_byte(write);
    dispatcher.remove_handle(read);

    assert!(!dispatcher.dispatch(Timeout::from_millis(20), DispatchFlags::ALL).unwrap());
    assert_eq!(hits.get(), 0);

    drop(dispatcher);
    common::close(&[read, write]);
}

#[rstest]
#[case::poll_set(poll_set as fn() -> Box<dyn PollBackend>)]
#[case::native(native as fn() -> Box<dyn PollBackend>)]
fn test_unclaimed_ready_handle_does_not_hold_dispatch(
    #[case] backend: fn() -> Box<dyn PollBackend>,
) {
    let mut dispatcher = isolated(backend);
    let (read, write) = common::pipe();
    let offers = Rc::new(Cell::new(0));
    let idled = Rc::new(Cell::new(false));

    let o = offers.clone();
    dispatcher
        .add_handle(read, InputMode::READ, move |_, _| {
            o.set(o.get() + 1);
            false
        })
        .unwrap();
    let i = idled.clone();
    dispatcher.add_idle(move || {
        i.set(true);
        false
    });

    // Never read back, so the pipe stays readable.
    common::write_byte(write);
    assert!(!dispatcher.dispatch(Timeout::NONE, DispatchFlags::ALL).unwrap());
    assert!(offers.get() >= 1);
    assert!(idled.get());

    let start = Instant::now();
    assert!(!dispatcher.dispatch(Timeout::from_millis(20), DispatchFlags::ALL).unwrap());
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(start.elapsed() < Duration::from_secs(2));

    drop(dispatcher);
    common::close(&[read, write]);
}

#[test]
fn test_budget_expires_without_activity() {
    let mut dispatcher = isolated(poll_set);
    let start = Instant::now();
    assert!(!dispatcher.dispatch(Timeout::from_millis(30), DispatchFlags::ALL).unwrap());
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_idle_runs_only_when_nothing_is_ready() {
    let mut dispatcher = isolated(poll_set);
    let order = Rc::new(RefCell::new(Vec::new()));

    let log = order.clone();
    dispatcher.add_idle(move || {
        log.borrow_mut().push("idle");
        true
    });
    let log = order.clone();
    dispatcher.add_timeout_at(
        move |_| {
            log.borrow_mut().push("timer");
            true
        },
        Instant::now(),
    );

    assert!(dispatcher.dispatch(Timeout::NONE, DispatchFlags::ALL).unwrap());
    assert!(dispatcher.dispatch(Timeout::NONE, DispatchFlags::ALL).unwrap());
    assert!(!dispatcher.dispatch(Timeout::NONE, DispatchFlags::ALL).unwrap());
    assert_eq!(*order.borrow(), ["timer", "idle"]);
    assert_eq!(dispatcher.idle_count(), 0);
}

#[test]
fn test_deferred_signal_from_another_thread() {
    let registry = common::isolated_registry();
    let mut dispatcher = Dispatcher::with_registry(poll_set(), registry).unwrap();
    let got = Rc::new(Cell::new(0));

    let g = got.clone();
    dispatcher
        .add_signal(libc::SIGHUP, move |sig| {
            g.set(sig);
            true
        })
        .unwrap();

    let raiser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        registry.raise(libc::SIGHUP);
    });
    assert!(dispatcher.dispatch(Timeout::Forever, DispatchFlags::ALL).unwrap());
    assert_eq!(got.get(), libc::SIGHUP);
    raiser.join().unwrap();
}

#[test]
fn test_signal_has_one_owner() {
    let registry = common::isolated_registry();
    let mut first = Dispatcher::with_registry(poll_set(), registry).unwrap();
    let mut second = Dispatcher::with_registry(poll_set(), registry).unwrap();

    first.add_signal(libc::SIGTERM, |_| true).unwrap();
    assert!(matches!(
        second.add_signal(libc::SIGTERM, |_| true),
        Err(Error::SignalOwned(sig)) if sig == libc::SIGTERM
    ));
    assert!(matches!(
        second.add_signal(64, |_| true),
        Err(Error::InvalidSignal(64))
    ));

    drop(first);
    assert!(!registry.is_owned(libc::SIGTERM));
    second.add_signal(libc::SIGTERM, |_| true).unwrap();
}

#[test]
fn test_os_signal_reaches_dispatcher() {
    let mut dispatcher = Dispatcher::new().unwrap();
    let got = Rc::new(Cell::new(0));

    let g = got.clone();
    dispatcher
        .add_signal(libc::SIGUSR1, move |sig| {
            g.set(sig);
            true
        })
        .unwrap();

    assert_eq!(unsafe { libc::raise(libc::SIGUSR1) }, 0);
    assert!(dispatcher.dispatch(Timeout::from_millis(1_000), DispatchFlags::ALL).unwrap());
    assert_eq!(got.get(), libc::SIGUSR1);

    assert!(dispatcher.remove_signal(libc::SIGUSR1).is_some());
    assert!(!dispatcher.has_signal(libc::SIGUSR1));
}

static IMMEDIATE: AtomicI32 = AtomicI32::new(0);

fn record_immediate(sig: i32) {
    IMMEDIATE.store(sig, Ordering::SeqCst);
}

#[test]
fn test_immediate_signal_runs_in_handler() {
    let mut dispatcher = Dispatcher::new().unwrap();
    dispatcher
        .add_signal_immediate(libc::SIGUSR2, record_immediate)
        .unwrap();

    assert_eq!(unsafe { libc::raise(libc::SIGUSR2) }, 0);
    assert_eq!(IMMEDIATE.load(Ordering::SeqCst), libc::SIGUSR2);
    assert!(!dispatcher.dispatch(Timeout::NONE, DispatchFlags::SIGNALS).unwrap());

    assert!(dispatcher.remove_signal(libc::SIGUSR2).is_none());
    assert!(!dispatcher.has_signal(libc::SIGUSR2));
}

#[test]
fn test_waker_interrupts_blocking_dispatch() {
    let mut dispatcher = isolated(poll_set);
    let waker = dispatcher.waker();

    let remote = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        waker.wake();
    });
    assert!(!dispatcher.dispatch(Timeout::Forever, DispatchFlags::ALL).unwrap());
    remote.join().unwrap();
}

#[test]
fn test_messages_from_many_threads_run_on_dispatcher() {
    let mut dispatcher = isolated(native);
    let sender = MessageChannel::attach(&mut dispatcher, 64).unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let home = thread::current().id();

    let posters: Vec<_> = (0..3)
        .map(|_| {
            let sender = sender.clone();
            let ran = ran.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let ran = ran.clone();
                    sender
                        .post(move || {
                            assert_eq!(thread::current().id(), home);
                            ran.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    let deadline = Instant::now() + Duration::from_secs(5);
    while ran.load(Ordering::SeqCst) < 30 && Instant::now() < deadline {
        dispatcher.dispatch(Timeout::from_millis(50), DispatchFlags::ALL).unwrap();
    }
    for p in posters {
        p.join().unwrap();
    }
    assert_eq!(ran.load(Ordering::SeqCst), 30);
    assert_eq!(sender.pending(), 0);
}

#[test]
fn test_event_dispatcher_coalesces_before_delivery() {
    let dispatcher = isolated(poll_set);
    let mut events = EventDispatcher::with_dispatcher(dispatcher, QueuedSource::new()).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let log = seen.clone();
    events.set_event_handler(move |event| {
        log.borrow_mut().push(event);
        true
    });

    for x in 0..5 {
        events
            .source_mut()
            .push(PlatformEvent::Motion { window: 1, x, y: 0, state: 0 });
    }
    events.source_mut().push(PlatformEvent::ButtonPress {
        window: 1,
        button: 5,
        x: 0,
        y: 0,
        state: 0,
    });
    events.source_mut().push(PlatformEvent::ButtonPress {
        window: 1,
        button: 5,
        x: 0,
        y: 0,
        state: 0,
    });

    assert!(!events.dispatch(Timeout::NONE, DispatchFlags::ALL & !DispatchFlags::EVENTS).unwrap());
    assert!(events.dispatch(Timeout::NONE, DispatchFlags::ALL).unwrap());
    assert!(events.dispatch(Timeout::NONE, DispatchFlags::ALL).unwrap());
    assert!(!events.dispatch(Timeout::NONE, DispatchFlags::ALL).unwrap());

    assert_eq!(
        *seen.borrow(),
        [
            PlatformEvent::Motion { window: 1, x: 4, y: 0, state: 0 },
            PlatformEvent::Wheel { window: 1, button: 5, ticks: 2, x: 0, y: 0, state: 0 },
        ]
    );
}

#[test]
fn test_event_dispatcher_keeps_dispatcher_callbacks() {
    let dispatcher = isolated(poll_set);
    let mut events = EventDispatcher::with_dispatcher(dispatcher, QueuedSource::new()).unwrap();
    let fired = Rc::new(Cell::new(false));

    let f = fired.clone();
    events.dispatcher_mut().add_timeout(
        move |_| {
            f.set(true);
            true
        },
        Duration::from_millis(1),
    );
    assert!(events.dispatch(Timeout::Forever, DispatchFlags::ALL).unwrap());
    assert!(fired.get());
}

/// Source reading one event per byte from a pipe.
struct PipeSource {
    fd: i32,
    queue: VecDeque<PlatformEvent>,
}

impl PlatformSource for PipeSource {
    fn connection_fd(&self) -> Option<i32> {
        Some(self.fd)
    }

    fn pending(&mut self) -> bool {
        let mut byte = 0u8;
        while unsafe { libc::read(self.fd, &mut byte as *mut u8 as *mut libc::c_void, 1) } == 1 {
            self.queue.push_back(PlatformEvent::Other {
                window: 7,
                kind: u32::from(byte),
                detail: 0,
            });
        }
        !self.queue.is_empty()
    }

    fn peek(&self) -> Option<&PlatformEvent> {
        self.queue.front()
    }

    fn next_event(&mut self) -> Option<PlatformEvent> {
        self.queue.pop_front()
    }
}

#[test]
fn test_connection_readiness_becomes_events() {
    let (read, write) = common::pipe();
    unsafe {
        let flags = libc::fcntl(read, libc::F_GETFL);
        libc::fcntl(read, libc::F_SETFL, flags | libc::O_NONBLOCK);
    }

    let source = PipeSource {
        fd: read,
        queue: VecDeque::new(),
    };
    let mut events = EventDispatcher::with_dispatcher(isolated(native), source).unwrap();
    assert!(!events.dispatcher().has_handle(read));

    let kinds = Rc::new(RefCell::new(Vec::new()));
    let log = kinds.clone();
    events.set_event_handler(move |event| match event {
        PlatformEvent::Other { kind, .. } => {
            log.borrow_mut().push(kind);
            true
        }
        _ => false,
    });

    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        common::write_byte(write);
        write
    });
    assert!(events.dispatch(Timeout::from_millis(2_000), DispatchFlags::ALL).unwrap());
    assert_eq!(*kinds.borrow(), [1]);

    let write = writer.join().unwrap();
    drop(events);
    common::close(&[read, write]);
}
