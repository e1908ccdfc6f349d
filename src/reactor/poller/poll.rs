use super::{PollBackend, Readiness, cvt, timeout_millis};
use crate::reactor::interest::InputMode;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT, POLLPRI, pollfd};
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Readiness set scanned with `poll(2)` on every wait.
#[derive(Debug, Default)]
pub struct PollSetBackend {
    fds: Vec<pollfd>,
}

impl PollSetBackend {
    pub fn new() -> io::Result<Self> {
        Ok(Self::default())
    }

    fn position(&self, fd: RawFd) -> Option<usize> {
        self.fds.iter().position(|entry| entry.fd == fd)
    }
}

fn interest_bits(mode: InputMode) -> libc::c_short {
    let mut bits = 0;
    if mode.contains(InputMode::READ) {
        bits |= POLLIN;
    }
    if mode.contains(InputMode::WRITE) {
        bits |= POLLOUT;
    }
    if mode.contains(InputMode::EXCEPT) {
        bits |= POLLPRI;
    }
    bits
}

fn raised_mode(bits: libc::c_short) -> InputMode {
    let mut mode = InputMode::empty();
    if bits & (POLLIN | POLLHUP) != 0 {
        mode |= InputMode::READ;
    }
    if bits & POLLOUT != 0 {
        mode |= InputMode::WRITE;
    }
    if bits & (POLLPRI | POLLERR | POLLNVAL) != 0 {
        mode |= InputMode::EXCEPT;
    }
    mode
}

impl PollBackend for PollSetBackend {
    fn add(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        if self.position(fd).is_some() {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }
        self.fds.push(pollfd {
            fd,
            events: interest_bits(mode),
            revents: 0,
        });
        Ok(())
    }

    fn modify(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        let index = self
            .position(fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        self.fds[index].events = interest_bits(mode);
        Ok(())
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        let index = self
            .position(fd)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))?;
        self.fds.swap_remove(index);
        Ok(())
    }

    fn wait(
        &mut self,
        events: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        cvt(unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        })?;

        let before = events.len();
        events.extend(
            self.fds
                .iter()
                .filter(|entry| entry.revents != 0)
                .map(|entry| Readiness {
                    fd: entry.fd,
                    mode: raised_mode(entry.revents),
                }),
        );

        Ok(events.len() - before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_and_missing_handles() {
        let mut backend = PollSetBackend::new().unwrap();
        backend.add(0, InputMode::READ).unwrap();
        assert!(backend.add(0, InputMode::WRITE).is_err());
        backend.modify(0, InputMode::WRITE).unwrap();
        backend.remove(0).unwrap();
        assert!(backend.remove(0).is_err());
        assert!(backend.modify(0, InputMode::READ).is_err());
    }
}
