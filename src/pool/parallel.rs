//! Fork-join helpers built on [`TaskGroup`].
//!
//! Both functions hand the pool closures that borrow from the caller's
//! stack. That is sound only because they never return before the group
//! has counted every one of those tasks as finished.

use crate::error::{Error, Result};
use crate::pool::core::PoolHandle;
use crate::pool::group::TaskGroup;
use crate::pool::task::Task;

use std::ops::Range;

/// Upper bound on the number of pieces [`parallel_for`] splits a range into.
pub const MAX_CHUNKS: usize = 128;

/// Runs every closure on the pool and returns once all have finished.
///
/// The last closure is submitted with `execute_and_wait`, so the calling
/// thread helps. If the pool is not running everything runs inline.
pub fn parallel_invoke(pool: &PoolHandle, fns: &[&(dyn Fn() + Sync)]) -> Result<()> {
    let Some((last, rest)) = fns.split_last() else {
        return Ok(());
    };

    if !pool.running() {
        fns.iter().for_each(|f| f());
        return Ok(());
    }

    let group = TaskGroup::new(pool);
    let mut refused = false;

    for f in rest {
        let f = *f;
        // SAFETY: `group` waits for this task before the borrow ends.
        let task = unsafe { Task::scoped(move || f()) };
        refused |= !group.execute(task);
    }

    let last = *last;
    // SAFETY: as above.
    let task = unsafe { Task::scoped(move || last()) };
    let submitted = group.execute_and_wait(task)?;
    group.wait()?;

    if refused || !submitted {
        return Err(Error::NotRunning);
    }
    Ok(())
}

/// Calls `f(i)` for every `i` in `range` stepping by `step`, split into at
/// most `chunks` contiguous pieces run in parallel.
///
/// A range holding a single step runs inline on the calling thread.
///
/// # Panics
/// Panics if `step` is 0.
///
/// # Example
/// ```ignore
/// let sums: Vec<AtomicU64> = ...;
/// parallel_for(&pool.handle(), 0..sums.len(), 1, 8, |i| {
///     sums[i].store(expensive(i), Ordering::Relaxed);
/// })?;
/// ```
pub fn parallel_for<F>(
    pool: &PoolHandle,
    range: Range<usize>,
    step: usize,
    chunks: usize,
    f: F,
) -> Result<()>
where
    F: Fn(usize) + Sync,
{
    assert!(step > 0, "parallel_for step must be positive");

    let Range { start, end } = range;
    if start >= end {
        return Ok(());
    }
    if step >= end - start {
        f(start);
        return Ok(());
    }

    let iterations = 1 + (end - start - 1) / step;
    let chunks = chunks.clamp(1, MAX_CHUNKS).min(iterations);

    if !pool.running() {
        (start..end).step_by(step).for_each(&f);
        return Ok(());
    }

    let group = TaskGroup::new(pool);
    let f = &f;
    let mut from = start;
    let mut refused = false;

    for c in 0..chunks {
        // Earlier chunks get the extra iterations.
        let count = (iterations + chunks - 1 - c) / chunks;
        let to = from.saturating_add(count * step).min(end);
        let piece = from..to;

        // SAFETY: `group` waits for this task before `f` goes out of scope.
        let task = unsafe { Task::scoped(move || piece.step_by(step).for_each(f)) };
        refused |= !group.execute(task);
        from = to;
    }

    group.wait()?;

    if refused {
        return Err(Error::NotRunning);
    }
    Ok(())
}
