//! Units of work and the panic trap every unit runs inside.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// A unit of work accepted by a [`WorkerPool`][crate::WorkerPool] or a
/// [`Dispatcher`][crate::Dispatcher].
///
/// Tasks take no arguments and return nothing. Whoever holds a task owns it; once a worker
/// thread has executed it, it is dropped.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub(crate) type PanicPayload = Box<dyn Any + Send>;

/// Outcome of a task that was executed inside a panic trap.
pub(crate) type TaskResult<R> = Result<R, PanicPayload>;

/// Runs a fire-and-forget task, logging instead of propagating any panic that escapes it.
///
/// Nobody is waiting for the outcome of such a task, so a panic is a programming error in the
/// task. The worker that ran it stays usable either way.
pub(crate) fn run_detached(task: Task) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = format_panic_payload(&payload);
        tracing::error!(
            panic_message = %message,
            "task panicked with nobody waiting for its result"
        );
    }
}

/// Runs a task whose outcome somebody is waiting for, capturing a panic as the error value.
pub(crate) fn run_captured<R, F>(f: F) -> TaskResult<R>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Formats a panic payload for logging.
pub(crate) fn format_panic_payload(payload: &PanicPayload) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
