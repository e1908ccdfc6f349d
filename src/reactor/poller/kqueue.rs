use super::{EVENT_BATCH, PollBackend, Readiness, cvt};
use crate::reactor::interest::InputMode;

use libc::{EV_ADD, EV_DELETE, EV_ENABLE, EV_EOF, EV_ERROR, EVFILT_READ, EVFILT_WRITE, kevent};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::Duration;

/// `kqueue` instance with one read and/or write filter per handle.
///
/// kqueue has no priority-data filter; `EXCEPT` is watched through the read
/// filter and raised on `EV_EOF`/`EV_ERROR`.
pub struct KqueueBackend {
    kqueue: RawFd,
    events: Vec<kevent>,
    modes: HashMap<RawFd, InputMode>,
}

fn change(fd: RawFd, filter: i16, flags: u16) -> kevent {
    let mut event: kevent = unsafe { std::mem::zeroed() };
    event.ident = fd as usize;
    event.filter = filter as _;
    event.flags = flags as _;
    event.udata = ptr::null_mut();
    event
}

impl KqueueBackend {
    pub fn new() -> io::Result<Self> {
        let kqueue = cvt(unsafe { libc::kqueue() })?;
        let events = (0..EVENT_BATCH)
            .map(|_| unsafe { std::mem::zeroed::<kevent>() })
            .collect();

        Ok(KqueueBackend {
            kqueue,
            events,
            modes: HashMap::new(),
        })
    }

    fn submit(&self, changes: &[kevent]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        cvt(unsafe {
            kevent(
                self.kqueue,
                changes.as_ptr(),
                changes.len() as libc::c_int,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        })?;
        Ok(())
    }

    fn filters(mode: InputMode) -> (bool, bool) {
        let read = mode.intersects(InputMode::READ | InputMode::EXCEPT);
        let write = mode.contains(InputMode::WRITE);
        (read, write)
    }

    fn apply(&mut self, fd: RawFd, old: InputMode, new: InputMode) -> io::Result<()> {
        let (old_read, old_write) = Self::filters(old);
        let (new_read, new_write) = Self::filters(new);
        let mut changes = Vec::with_capacity(2);

        for (filter, was, is) in [
            (EVFILT_READ, old_read, new_read),
            (EVFILT_WRITE, old_write, new_write),
        ] {
            match (was, is) {
                (false, true) => changes.push(change(fd, filter as i16, (EV_ADD | EV_ENABLE) as u16)),
                (true, false) => changes.push(change(fd, filter as i16, EV_DELETE as u16)),
                _ => {}
            }
        }

        self.submit(&changes)
    }
}

impl PollBackend for KqueueBackend {
    fn add(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        if self.modes.contains_key(&fd) {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        self.apply(fd, InputMode::empty(), mode)?;
        self.modes.insert(fd, mode);
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        let old = *self
            .modes
            .get(&fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        self.apply(fd, old, mode)?;
        self.modes.insert(fd, mode);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let old = self
            .modes
            .remove(&fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        self.apply(fd, old, InputMode::empty())
    }

    fn wait(
        &mut self,
        events: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: d.subsec_nanos() as _,
        });
        let ts_ptr = ts
            .as_ref()
            .map_or(ptr::null(), |ts| ts as *const libc::timespec);

        let n = cvt(unsafe {
            kevent(
                self.kqueue,
                ptr::null(),
                0,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                ts_ptr,
            )
        })? as usize;

        let before = events.len();
        for event in &self.events[..n] {
            let fd = event.ident as RawFd;
            let watched = self.modes.get(&fd).copied().unwrap_or_default();

            let mut mode = InputMode::empty();
            if event.filter == EVFILT_READ as _ {
                mode |= watched & InputMode::READ;
            }
            if event.filter == EVFILT_WRITE as _ {
                mode |= InputMode::WRITE;
            }
            if event.flags & (EV_EOF | EV_ERROR) as u16 as _ != 0 {
                mode |= watched & InputMode::EXCEPT;
            }
            if mode.is_empty() {
                continue;
            }

            // One entry per handle: a read and a write filter may both fire.
            match events[before..].iter_mut().find(|r| r.fd == fd) {
                Some(existing) => existing.mode |= mode,
                None => events.push(Readiness { fd, mode }),
            }
        }

        Ok(events.len() - before)
    }
}

impl Drop for KqueueBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.kqueue) };
    }
}
