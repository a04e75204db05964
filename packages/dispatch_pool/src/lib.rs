#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! FIFO and LIFO task dispatchers, serial or concurrent, over a growable worker thread pool.
//!
//! This crate offers two coordination primitives:
//!
//! * [`WorkerPool`] executes arbitrary tasks on a lazily grown set of worker threads. A new
//!   worker is spawned only when more tasks are waiting than there are idle workers, up to a
//!   configured maximum (256 by default). Idle workers are reused.
//! * [`Dispatcher`] admits tasks into a pending list and hands them to a pool, either
//!   **concurrently** (each task is an independent pool submission) or **serially** (one task
//!   at a time, in the dispatcher's order). The order is set by the selector type: [`Fifo`]
//!   (see [`FifoDispatcher`]) or [`Lifo`] (see [`LifoDispatcher`]).
//!
//! On top of dispatchers, the sync bridge ([`Dispatcher::sync()`],
//! [`Dispatcher::sync_failable()`], [`Dispatcher::try_sync()`]) blocks the caller until a
//! dispatched closure has run and hands back its result, its error or its panic.
//!
//! # Quick start
//!
//! ```rust
//! use dispatch_pool::{FifoDispatcher, LifoDispatcher};
//!
//! // Process-wide concurrent dispatchers, shared by every caller.
//! let answer = FifoDispatcher::global().sync(|| 6 * 7);
//! assert_eq!(answer, 42);
//!
//! // A private serial dispatcher on the process-wide pool.
//! let serial = LifoDispatcher::new_serial();
//! serial.dispatch(|| println!("runs on a pool thread"));
//!
//! let parsed: Result<u32, std::num::ParseIntError> = serial.sync_failable(|| "17".parse());
//! assert_eq!(parsed, Ok(17));
//! ```
//!
//! # Sharing the pool
//!
//! Every dispatcher executes on the process-wide pool from [`PoolHandle::global()`] unless it
//! is built with a different one via [`DispatcherBuilder::pool()`]. The global pool is never
//! shut down.
//!
//! # Shutdown behavior
//!
//! When a [`WorkerPool`] is shut down (explicitly or by dropping it), queued tasks that have
//! not started are discarded and the call waits for running tasks to complete. Dispatchers
//! built on that pool drop their pending tasks as the pool discards their scheduled work, so a
//! caller blocked in [`Dispatcher::try_sync()`] gets [`Error::Abandoned`] rather than waiting
//! forever.
//!
//! # Panics
//!
//! A panic escaping a fire-and-forget task is caught and logged. A panic escaping a closure
//! passed to the sync bridge is re-thrown on the waiting thread.
//!
//! # Deadlocks
//!
//! Tasks may dispatch more work and may even wait for it with the sync bridge. Each such wait
//! occupies a worker thread. If every worker of a pool is blocked waiting for tasks that need
//! a free worker to run, the pool stops making progress. This is not detected.

mod dispatcher;
mod error;
mod pool;
mod pool_handle;
mod selector;
mod stats;
mod sync_bridge;
mod task;

pub use dispatcher::*;
pub use error::*;
pub(crate) use pool::PoolInner;
pub use pool::*;
pub use pool_handle::*;
pub use selector::*;
pub use stats::*;
pub use task::Task;
pub(crate) use task::*;
