use super::{EVENT_BATCH, PollBackend, Readiness, cvt, timeout_millis};
use crate::reactor::interest::InputMode;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLPRI, EPOLLRDHUP, epoll_event,
};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Level-triggered `epoll` instance.
pub struct EpollBackend {
    epoll: RawFd,
    events: Vec<epoll_event>,
}

impl EpollBackend {
    pub fn new() -> io::Result<Self> {
        let epoll = cvt(unsafe { libc::epoll_create1(EPOLL_CLOEXEC) })?;
        let events = vec![epoll_event { events: 0, u64: 0 }; EVENT_BATCH];

        Ok(EpollBackend { epoll, events })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, mode: InputMode) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest_bits(mode),
            u64: fd as u64,
        };
        cvt(unsafe { libc::epoll_ctl(self.epoll, op, fd, &mut event) })?;
        Ok(())
    }
}

fn interest_bits(mode: InputMode) -> u32 {
    let mut bits = 0;
    if mode.contains(InputMode::READ) {
        bits |= EPOLLIN | EPOLLRDHUP;
    }
    if mode.contains(InputMode::WRITE) {
        bits |= EPOLLOUT;
    }
    if mode.contains(InputMode::EXCEPT) {
        bits |= EPOLLPRI;
    }
    bits as u32
}

fn raised_mode(bits: u32) -> InputMode {
    let bits = bits as libc::c_int;
    let mut mode = InputMode::empty();
    if bits & (EPOLLIN | EPOLLHUP | EPOLLRDHUP) != 0 {
        mode |= InputMode::READ;
    }
    if bits & EPOLLOUT != 0 {
        mode |= InputMode::WRITE;
    }
    if bits & (EPOLLERR | EPOLLPRI) != 0 {
        mode |= InputMode::EXCEPT;
    }
    mode
}

impl PollBackend for EpollBackend {
    fn add(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, mode)
    }

    fn modify(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, mode)
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        self.ctl(EPOLL_CTL_DEL, fd, InputMode::empty())
    }

    fn wait(
        &mut self,
        events: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        let n = cvt(unsafe {
            libc::epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_millis(timeout),
            )
        })? as usize;

        events.extend(self.events[..n].iter().map(|event| Readiness {
            fd: event.u64 as RawFd,
            mode: raised_mode(event.events),
        }));

        Ok(n)
    }
}

impl Drop for EpollBackend {
    fn drop(&mut self) {
        unsafe { libc::close(self.epoll) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_mapping() {
        let bits = interest_bits(InputMode::READ | InputMode::EXCEPT);
        assert_ne!(bits & EPOLLIN as u32, 0);
        assert_ne!(bits & EPOLLPRI as u32, 0);
        assert_eq!(bits & EPOLLOUT as u32, 0);

        assert_eq!(raised_mode(EPOLLHUP as u32), InputMode::READ);
        assert_eq!(
            raised_mode((EPOLLOUT | EPOLLERR) as u32),
            InputMode::WRITE | InputMode::EXCEPT
        );
    }
}
