//! Blocking waits for tasks scheduled through a dispatcher.
//!
//! Each call creates a one-shot channel, dispatches a wrapper that runs the caller's closure
//! inside a panic trap and sends the outcome, then blocks on the receiving end. If the
//! dispatcher abandons the wrapper (its pool was shut down), the sender is dropped unsent and
//! the receiver reports the disconnect instead of blocking forever.

use std::panic;

use crate::{Dispatcher, Error, Result, TaskResult, TaskSelector, run_captured};

impl<S: TaskSelector> Dispatcher<S> {
    /// Dispatches `f` and blocks the calling thread until it has run, returning its result.
    ///
    /// The closure is admitted exactly like [`dispatch()`](Self::dispatch), so on a serial
    /// dispatcher it runs after (FIFO) or before (LIFO) the tasks already pending.
    ///
    /// There is no timeout. Calling this from a task that is itself running on the same
    /// worker pool is allowed, but if every worker of the pool ends up blocked in such a call,
    /// nothing is left to run the awaited tasks and the calls never return. Calling it from a
    /// task of the same serial dispatcher always blocks forever.
    ///
    /// # Panics
    ///
    /// If `f` panics, the panic is re-thrown on the calling thread with the original payload.
    ///
    /// Panics if the task was abandoned because the worker pool was shut down. Use
    /// [`try_sync()`](Self::try_sync) to handle that case as an error instead.
    pub fn sync<R, F>(&self, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        match self.try_sync(f) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    /// Dispatches a fallible `f` and blocks until it has run, passing its error through.
    ///
    /// The task's own error value is returned to the caller unchanged.
    ///
    /// # Errors
    ///
    /// Returns whatever error `f` returned.
    ///
    /// # Panics
    ///
    /// Same as [`sync()`](Self::sync).
    pub fn sync_failable<R, E, F>(&self, f: F) -> std::result::Result<R, E>
    where
        R: Send + 'static,
        E: Send + 'static,
        F: FnOnce() -> std::result::Result<R, E> + Send + 'static,
    {
        self.sync(f)
    }

    /// Like [`sync()`](Self::sync) but reports an abandoned task as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Abandoned`] if the worker pool was shut down before the task ran.
    ///
    /// # Panics
    ///
    /// If `f` panics, the panic is re-thrown on the calling thread with the original payload.
    pub fn try_sync<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel::<TaskResult<R>>();

        self.dispatch(move || {
            let result = run_captured(f);

            // The receiver only goes away if the waiting thread itself is gone.
            drop(sender.send(result));
        });

        match receiver.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic_payload)) => panic::resume_unwind(panic_payload),
            Err(_disconnected) => Err(Error::Abandoned),
        }
    }
}
