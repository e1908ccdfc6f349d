//! OS readiness backends behind one [`PollBackend`] interface.
//!
//! - [`EpollBackend`]: `epoll(7)`, Linux and Android
//! - [`KqueueBackend`]: `kqueue(2)`, macOS and the BSDs
//! - [`PollSetBackend`]: `poll(2)`, any Unix
//!
//! [`DefaultBackend`] is the scalable one for the build target.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
mod kqueue;
mod poll;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::EpollBackend;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub use kqueue::KqueueBackend;
pub use poll::PollSetBackend;

use crate::reactor::interest::InputMode;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub type DefaultBackend = EpollBackend;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub type DefaultBackend = KqueueBackend;

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub type DefaultBackend = PollSetBackend;

/// Most readiness entries collected by one wait.
pub const EVENT_BATCH: usize = 128;

/// One handle reported ready by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: RawFd,
    pub mode: InputMode,
}

/// A multiplexing facility the reactor waits on.
pub trait PollBackend {
    /// Starts watching `fd` for `mode`.
    fn add(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()>;

    /// Replaces the watched mode of `fd`.
    fn modify(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()>;

    /// Stops watching `fd`.
    fn remove(&mut self, fd: RawFd) -> io::Result<()>;

    /// Waits up to `timeout` (`None` forever) and appends ready handles to
    /// `events`, at most one entry per handle.
    ///
    /// An interrupted wait returns an error of kind `Interrupted`.
    fn wait(&mut self, events: &mut Vec<Readiness>, timeout: Option<Duration>)
    -> io::Result<usize>;
}

impl<B: PollBackend + ?Sized> PollBackend for Box<B> {
    fn add(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        (**self).add(fd, mode)
    }

    fn modify(&mut self, fd: RawFd, mode: InputMode) -> io::Result<()> {
        (**self).modify(fd, mode)
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        (**self).remove(fd)
    }

    fn wait(
        &mut self,
        events: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> io::Result<usize> {
        (**self).wait(events, timeout)
    }
}

/// Milliseconds for `poll`/`epoll_wait`, rounded up so a wait never ends
/// before `timeout`; `-1` means forever.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if Duration::from_millis(ms as u64) < d {
                ms += 1;
            }
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Maps a negative libc return value to the thread's last OS error.
pub(crate) fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_millis_rounds_up() {
        assert_eq!(timeout_millis(None), -1);
        assert_eq!(timeout_millis(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_millis(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_millis(Some(Duration::from_millis(5))), 5);
        assert_eq!(timeout_millis(Some(Duration::from_micros(5_001))), 6);
        assert_eq!(timeout_millis(Some(Duration::MAX)), libc::c_int::MAX);
    }
}
