//! Worker threads of a [`ThreadPool`](crate::pool::ThreadPool).

use crate::pool::context;
use crate::pool::core::Inner;
use crate::time::Timeout;
use crate::utils::ScopeGuard;

use std::io;
use std::sync::Arc;
use std::thread;

/// Spawns a detached worker; `index` is the live worker count before it.
///
/// The first `min_threads` workers wait for work forever, the others give
/// up after the pool's expiration and exit.
pub(crate) fn spawn(inner: Arc<Inner>, index: usize) -> io::Result<()> {
    let mut builder = thread::Builder::new().name(inner.thread_name());
    if let Some(size) = inner.stack_size() {
        builder = builder.stack_size(size);
    }

    builder.spawn(move || run(inner, index))?;
    Ok(())
}

fn run(inner: Arc<Inner>, index: usize) {
    context::enter(&inner);
    let _exit = ScopeGuard::new(|| {
        context::leave(&inner);
        inner.worker_exited();
    });

    let timeout = if index < inner.min_threads() {
        Timeout::Forever
    } else {
        inner.expiration()
    };

    tracing::debug!(index, ?timeout, "worker started");

    match inner.work(timeout) {
        Ok(()) => tracing::debug!(index, "worker exiting"),
        Err(err) => {
            tracing::error!(index, %err, "task failed, worker exiting");
            inner.record_failure(err);
        }
    }
}
