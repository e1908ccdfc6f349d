//! Signal ownership and delivery.
//!
//! A [`SignalRegistry`] maps each signal number to at most one owning
//! reactor. The process-wide registry ([`SignalRegistry::global`]) installs
//! real `sigaction` handlers; [`SignalRegistry::new`] builds an isolated one
//! whose deliveries are injected with [`SignalRegistry::raise`], which keeps
//! tests independent of process signal state.
//!
//! Everything reachable from a delivery is async-signal-safe: atomic loads
//! and stores plus one `write` on the owner's wake pipe.

use crate::error::{Error, Result};
use crate::reactor::waker;

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

/// Signal numbers are `1..MAX_SIGNALS`.
pub const MAX_SIGNALS: usize = 64;

/// How a claimed signal is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    /// Mark the signal pending and wake the owner; the callback runs inside
    /// the owner's next `dispatch`.
    Deferred,
    /// Run the function right inside the OS handler. It must only do
    /// async-signal-safe work.
    Immediate(fn(i32)),
}

/// Per-reactor pending flags, written from signal context.
#[derive(Debug)]
pub(crate) struct SignalSet {
    pending: [AtomicBool; MAX_SIGNALS],
    notified: AtomicBool,
    wake_fd: RawFd,
}

impl SignalSet {
    pub(crate) fn new(wake_fd: RawFd) -> Self {
        SignalSet {
            pending: [const { AtomicBool::new(false) }; MAX_SIGNALS],
            notified: AtomicBool::new(false),
            wake_fd,
        }
    }

    fn raise(&self, sig: usize) {
        self.pending[sig].store(true, Ordering::Release);
        if !self.notified.swap(true, Ordering::AcqRel) {
            waker::notify(self.wake_fd);
        }
    }

    /// Re-arms the wake notification after the owner drained its pipe.
    pub(crate) fn rearm(&self) {
        self.notified.store(false, Ordering::Release);
    }

    /// Takes the next pending signal, scanning from `start` and wrapping.
    pub(crate) fn take_from(&self, start: usize) -> Option<i32> {
        (0..MAX_SIGNALS)
            .map(|offset| (start + offset) % MAX_SIGNALS)
            .filter(|sig| *sig != 0)
            .find(|sig| self.pending[*sig].swap(false, Ordering::AcqRel))
            .map(|sig| sig as i32)
    }

    pub(crate) fn clear(&self, sig: usize) {
        self.pending[sig].store(false, Ordering::Release);
    }
}

struct Slot {
    owner: AtomicUsize,
    target: AtomicPtr<SignalSet>,
    // `fn(i32)` stored as an address; 0 means deferred delivery.
    hook: AtomicUsize,
}

impl Slot {
    const fn new() -> Self {
        Slot {
            owner: AtomicUsize::new(0),
            target: AtomicPtr::new(ptr::null_mut()),
            hook: AtomicUsize::new(0),
        }
    }
}

/// Table of signal owners, indexed by signal number.
pub struct SignalRegistry {
    slots: [Slot; MAX_SIGNALS],
    install_handlers: bool,
}

static GLOBAL: SignalRegistry = SignalRegistry {
    slots: [const { Slot::new() }; MAX_SIGNALS],
    install_handlers: true,
};

extern "C" fn on_signal(sig: libc::c_int) {
    GLOBAL.deliver(sig);
}

fn slot_index(sig: i32) -> Result<usize> {
    if (1..MAX_SIGNALS as i32).contains(&sig) {
        Ok(sig as usize)
    } else {
        Err(Error::InvalidSignal(sig))
    }
}

fn set_disposition(sig: i32, handler: libc::sighandler_t) -> io::Result<()> {
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler;
        libc::sigfillset(&mut action.sa_mask);
        action.sa_flags = 0;
        if libc::sigaction(sig, &action, ptr::null_mut()) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl SignalRegistry {
    /// Creates an isolated registry that never touches OS signal handlers.
    pub const fn new() -> Self {
        SignalRegistry {
            slots: [const { Slot::new() }; MAX_SIGNALS],
            install_handlers: false,
        }
    }

    /// The process-wide registry backed by real signal handlers.
    pub fn global() -> &'static SignalRegistry {
        &GLOBAL
    }

    /// Claims `sig` for `owner`, delivering into `target`.
    ///
    /// Re-claiming a signal the owner already holds only changes its mode.
    pub(crate) fn claim(
        &self,
        sig: i32,
        owner: usize,
        target: &SignalSet,
        mode: SignalMode,
    ) -> Result<()> {
        let index = slot_index(sig)?;
        let slot = &self.slots[index];

        let fresh = match slot
            .owner
            .compare_exchange(0, owner, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) if current == owner => false,
            Err(_) => return Err(Error::SignalOwned(sig)),
        };

        let hook = match mode {
            SignalMode::Deferred => 0,
            SignalMode::Immediate(f) => f as usize,
        };
        slot.hook.store(hook, Ordering::Release);
        slot.target
            .store(target as *const SignalSet as *mut SignalSet, Ordering::Release);

        if fresh && self.install_handlers {
            if let Err(err) = set_disposition(sig, on_signal as libc::sighandler_t) {
                slot.target.store(ptr::null_mut(), Ordering::Release);
                slot.hook.store(0, Ordering::Release);
                slot.owner.store(0, Ordering::Release);
                return Err(Error::Io(err));
            }
        }

        Ok(())
    }

    /// Releases `sig` if `owner` holds it, restoring the default disposition.
    pub(crate) fn release(&self, sig: i32, owner: usize) -> bool {
        let Ok(index) = slot_index(sig) else {
            return false;
        };
        let slot = &self.slots[index];
        if slot.owner.load(Ordering::Acquire) != owner {
            return false;
        }

        if self.install_handlers {
            if let Err(err) = set_disposition(sig, libc::SIG_DFL) {
                tracing::warn!(sig, %err, "failed to restore default signal disposition");
            }
        }

        slot.hook.store(0, Ordering::Release);
        slot.target.store(ptr::null_mut(), Ordering::Release);
        slot.owner.store(0, Ordering::Release);
        true
    }

    /// True when some reactor owns `sig`.
    pub fn is_owned(&self, sig: i32) -> bool {
        slot_index(sig).is_ok_and(|index| self.slots[index].owner.load(Ordering::Acquire) != 0)
    }

    /// Delivers `sig` as if the OS had raised it.
    ///
    /// Unowned or invalid signals are ignored.
    pub fn raise(&self, sig: i32) {
        self.deliver(sig);
    }

    fn deliver(&self, sig: i32) {
        let Ok(index) = slot_index(sig) else {
            return;
        };
        let slot = &self.slots[index];

        let hook = slot.hook.load(Ordering::Acquire);
        if hook != 0 {
            // SAFETY: only ever stored from a `fn(i32)` in `claim`.
            let hook: fn(i32) = unsafe { mem::transmute::<usize, fn(i32)>(hook) };
            hook(sig);
            return;
        }

        let target = slot.target.load(Ordering::Acquire);
        if !target.is_null() {
            // SAFETY: the owning reactor releases its signals before
            // dropping the set.
            unsafe { (*target).raise(index) };
        }
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
