//! Self-pipe used to interrupt a blocked reactor wait.
//!
//! Signal handlers write to the same pipe, so the write side sticks to
//! async-signal-safe calls.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub(crate) struct WakePipe {
    read: RawFd,
    write: RawFd,
    woken: AtomicBool,
}

pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Creates a non-blocking, close-on-exec pipe; returns `(read, write)`.
pub(crate) fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }

    let configured = set_nonblocking(fds[0]).and_then(|()| set_nonblocking(fds[1]));
    if let Err(err) = configured {
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
        return Err(err);
    }

    Ok((fds[0], fds[1]))
}

/// Writes one byte; a full pipe already guarantees a wakeup.
pub(crate) fn notify(fd: RawFd) {
    let byte = 1u8;
    unsafe {
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
    }
}

/// Reads until the pipe is empty; returns the number of bytes consumed.
pub(crate) fn drain(fd: RawFd) -> usize {
    let mut buf = [0u8; 256];
    let mut total = 0;
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            return total;
        }
        total += n as usize;
    }
}

impl WakePipe {
    pub(crate) fn new() -> io::Result<Self> {
        let (read, write) = pipe()?;
        Ok(WakePipe {
            read,
            write,
            woken: AtomicBool::new(false),
        })
    }

    pub(crate) fn read_fd(&self) -> RawFd {
        self.read
    }

    pub(crate) fn write_fd(&self) -> RawFd {
        self.write
    }

    pub(crate) fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        notify(self.write);
    }

    /// Empties the pipe; returns whether a [`ReactorWaker`] asked for the
    /// current dispatch to return.
    pub(crate) fn reset(&self) -> bool {
        drain(self.read);
        self.woken.swap(false, Ordering::AcqRel)
    }
}

impl Drop for WakePipe {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.read);
            libc::close(self.write);
        }
    }
}

/// Interrupts a blocked `dispatch` from any thread.
///
/// The interrupted call returns `Ok(false)`.
#[derive(Debug, Clone)]
pub struct ReactorWaker {
    pipe: Arc<WakePipe>,
}

impl ReactorWaker {
    pub(crate) fn new(pipe: Arc<WakePipe>) -> Self {
        ReactorWaker { pipe }
    }

    pub fn wake(&self) {
        self.pipe.wake();
    }
}
