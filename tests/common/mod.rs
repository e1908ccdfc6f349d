#![allow(dead_code)]

use evcore::SignalRegistry;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Installs a test-writer subscriber honouring `RUST_LOG`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}

/// A registry of its own for each test, so signal claims never collide.
pub fn isolated_registry() -> &'static SignalRegistry {
    Box::leak(Box::new(SignalRegistry::new()))
}

/// A plain pipe; the caller closes both ends.
pub fn pipe() -> (i32, i32) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

pub fn write_byte(fd: i32) {
    let byte = 1u8;
    assert_eq!(unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) }, 1);
}

pub fn read_byte(fd: i32) {
    let mut byte = 0u8;
    assert_eq!(unsafe { libc::read(fd, &mut byte as *mut u8 as *mut libc::c_void, 1) }, 1);
}

pub fn close(fds: &[i32]) {
    for fd in fds {
        unsafe { libc::close(*fd) };
    }
}
