//! The executing worker's identity, as seen from inside a running task.
//!
//! A task closure has no argument list (`Fn()`), so it has no direct way
//! to learn which of the pool's worker slots it landed on; callers that
//! need a stable per-worker resource (`ecs_systems`'s per-worker command
//! buffer, spec.md §5) read it back out of this thread-local instead.

use std::cell::Cell;

thread_local! {
    static WORKER_SLOT: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Assigns the calling thread's slot. Spawned pool workers get `0..N`;
/// the thread that calls `wait_help` (or `run_single_threaded`) takes the
/// next slot up, so it never aliases a spawned worker's buffer.
pub(crate) fn set_current_worker(id: usize) {
    WORKER_SLOT.with(|c| c.set(Some(id)));
}

/// The calling thread's worker slot.
///
/// # Panics
/// Panics if called from a thread the scheduler never assigned a slot to
/// -- i.e. outside a running task or a `wait_help`/`run_single_threaded`
/// call. This is a programmer error, not a recoverable condition.
pub fn current_worker() -> usize {
    WORKER_SLOT
        .with(|c| c.get())
        .expect("current_worker() called outside a scheduler task")
}
