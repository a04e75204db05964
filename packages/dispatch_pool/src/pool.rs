//! Pool management and lifecycle.

use std::any::type_name;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::num::NonZero;
use std::panic;
#[cfg(test)]
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle as ThreadJoinHandle};

use new_zealand::nz;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{PoolHandle, PoolStats, Task, run_detached};

const DEFAULT_MAX_THREADS: NonZero<usize> = nz!(256_usize);

const DEFAULT_NAME: &str = "dispatch-pool";

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(0);

/// Everything the pool lock guards.
struct PoolState {
    queue: VecDeque<Task>,
    live_threads: usize,
    active_threads: usize,
    shutting_down: bool,
}

impl PoolState {
    fn idle_threads(&self) -> usize {
        self.live_threads.saturating_sub(self.active_threads)
    }
}

pub(crate) struct PoolInner {
    pub(crate) pool_id: u64,
    name: String,
    max_threads: NonZero<usize>,
    state: Mutex<PoolState>,
    work_available: Condvar,
    worker_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
}

impl fmt::Debug for PoolInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();

        f.debug_struct(type_name::<Self>())
            .field("pool_id", &self.pool_id)
            .field("name", &self.name)
            .field("stats", &stats)
            .finish_non_exhaustive()
    }
}

impl PoolInner {
    fn new(name: String, max_threads: NonZero<usize>) -> Self {
        Self {
            pool_id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name,
            max_threads,
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                live_threads: 0,
                active_threads: 0,
                shutting_down: false,
            }),
            work_available: Condvar::new(),
            worker_handles: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn submit(self: &Arc<Self>, task: Task) {
        let mut state = self.state.lock();

        if state.shutting_down {
            drop(state);

            debug!(
                pool_id = self.pool_id,
                "discarding task submitted after shutdown"
            );

            // Dropped outside the lock: the task may own values whose destructors call back
            // into the pool.
            drop(task);
            return;
        }

        state.queue.push_back(task);

        if state.queue.len() > state.idle_threads() && state.live_threads < self.max_threads.get()
        {
            let worker_index = state.live_threads;
            state.live_threads = state.live_threads.wrapping_add(1);

            // The handle is registered while the pool lock is still held, so a shutdown that
            // starts after this point is guaranteed to see (and join) the new worker.
            self.spawn_worker(worker_index);
        }

        trace!(
            pool_id = self.pool_id,
            queued_tasks = state.queue.len(),
            live_threads = state.live_threads,
            "task submitted"
        );

        drop(state);
        self.work_available.notify_one();
    }

    fn spawn_worker(self: &Arc<Self>, worker_index: usize) {
        let inner = Arc::clone(self);

        let handle = thread::Builder::new()
            .name(format!("{}-w{worker_index}", self.name))
            .spawn(move || {
                debug!(pool_id = inner.pool_id, worker_index, "worker thread started");
                worker_loop(&inner, worker_index);
                debug!(pool_id = inner.pool_id, worker_index, "worker thread exiting");
            })
            .expect("failed to spawn worker thread: thread spawning failure is not supported");

        self.worker_handles.lock().push(handle);
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.state.lock();

        PoolStats {
            max_threads: self.max_threads.get(),
            live_threads: state.live_threads,
            active_threads: state.active_threads,
            queued_tasks: state.queue.len(),
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.state.lock().shutting_down
    }

    #[cfg_attr(test, mutants::skip)] // Removing this causes timeouts (workers never stop).
    pub(crate) fn shut_down(&self) {
        let discarded = {
            let mut state = self.state.lock();
            state.shutting_down = true;
            mem::take(&mut state.queue)
        };

        self.work_available.notify_all();

        debug!(
            pool_id = self.pool_id,
            discarded_tasks = discarded.len(),
            "worker pool shutting down"
        );

        // Abandoned tasks are dropped without the pool lock held, for the same reason as in
        // `submit()`. This is what lets dispatchers release their waiting callers.
        drop(discarded);

        let handles = mem::take(&mut *self.worker_handles.lock());
        let current_thread = thread::current().id();

        for handle in handles {
            if handle.thread().id() == current_thread {
                // Shutdown was requested from a task running on this pool. That worker will
                // exit on its own once the task returns; waiting for it here would never end.
                trace!(
                    pool_id = self.pool_id,
                    "not joining the worker thread that requested shutdown"
                );
                continue;
            }

            if let Err(payload) = handle.join() {
                // Worker threads run every task inside a panic trap and should never panic.
                // If one does, the pool infrastructure itself is broken.
                panic::resume_unwind(payload);
            }
        }
    }
}

fn worker_loop(inner: &PoolInner, worker_index: usize) {
    let mut state = inner.state.lock();

    loop {
        while state.queue.is_empty() && !state.shutting_down {
            inner.work_available.wait(&mut state);
        }

        if state.shutting_down {
            break;
        }

        let Some(task) = state.queue.pop_front() else {
            continue;
        };

        state.active_threads = state.active_threads.wrapping_add(1);

        MutexGuard::unlocked(&mut state, || run_detached(task));

        state.active_threads = state.active_threads.wrapping_sub(1);

        trace!(pool_id = inner.pool_id, worker_index, "executed task");
    }

    state.live_threads = state.live_threads.wrapping_sub(1);
}

/// A growable pool of worker threads that executes submitted tasks in submission order.
///
/// Worker threads are spawned lazily: a submission spawns one new worker when more tasks are
/// waiting than there are idle workers, until the configured maximum is reached. Beyond that,
/// tasks wait in an unbounded queue until a worker becomes free. Idle workers are reused and
/// are never reclaimed while the pool is running.
///
/// Tasks may themselves submit more work to the pool. Blocking a task on work that needs
/// another worker (e.g. [`Dispatcher::sync()`][crate::Dispatcher::sync] from inside a task)
/// can starve the pool once every worker is blocked that way; this is not detected.
///
/// # Lifetime
///
/// When the pool is shut down, either explicitly via [`shutdown()`](Self::shutdown) or by
/// dropping it:
/// 1. New submissions are discarded.
/// 2. Queued tasks that have not started are discarded.
/// 3. The call blocks until every currently-executing task completes and all workers exit.
///
/// # Example
///
/// ```rust
/// use std::sync::mpsc;
///
/// use dispatch_pool::WorkerPool;
///
/// let pool = WorkerPool::new();
/// let (tx, rx) = mpsc::channel();
///
/// pool.submit(move || tx.send(42).unwrap());
///
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
#[derive(Debug)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a new pool with default settings.
    ///
    /// Use [`WorkerPool::builder()`] for custom configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a builder for configuring the pool.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Returns a handle that can be used to submit tasks to this pool.
    ///
    /// The handle can be cloned and shared across threads. It does not keep the pool running:
    /// once the pool is shut down, tasks submitted through the handle are discarded.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        PoolHandle::new(Arc::clone(&self.inner))
    }

    /// Enqueues a task for execution on one of the pool's worker threads.
    ///
    /// Returns immediately. A panic escaping the task is logged and discarded.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.submit(Box::new(task));
    }

    /// Returns a snapshot of the pool's thread accounting.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Whether [`shutdown()`](Self::shutdown) has been called on this pool.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Stops the pool, discarding queued tasks and waiting for running tasks to finish.
    ///
    /// Calling this more than once is harmless. If called from a task running on this pool,
    /// the calling worker is not waited for.
    pub fn shutdown(&self) {
        self.inner.shut_down();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.inner.shut_down();
    }
}

#[cfg(test)]
impl WorkerPool {
    /// Occupies one worker until the pool starts shutting down. Returns once the blocking task
    /// is running, so anything submitted afterwards stays queued while the worker is busy.
    pub(crate) fn block_worker_until_shutdown(&self) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        self.submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        started_rx.recv().unwrap();

        // The shutdown flag is set in the same critical section that empties the queue, so
        // releasing the worker after observing it cannot let a queued task run.
        let handle = self.handle();
        thread::spawn(move || {
            testing::wait_until(|| handle.is_shut_down());
            release_tx.send(()).unwrap();
        });
    }
}

/// Builder for configuring a [`WorkerPool`].
#[derive(Debug)]
pub struct PoolBuilder {
    max_threads: NonZero<usize>,
    name: String,
}

impl PoolBuilder {
    fn new() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            name: DEFAULT_NAME.to_string(),
        }
    }

    /// Sets the maximum number of worker threads the pool may spawn.
    ///
    /// Default is 256.
    #[must_use]
    pub fn max_threads(mut self, count: NonZero<usize>) -> Self {
        self.max_threads = count;
        self
    }

    /// Sets the prefix used to name worker threads (`{name}-w{index}`).
    ///
    /// Default is `dispatch-pool`.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builds the pool with the configured settings.
    ///
    /// No worker threads are started until the first task is submitted.
    #[must_use]
    pub fn build(self) -> WorkerPool {
        WorkerPool {
            inner: Arc::new(PoolInner::new(self.name, self.max_threads)),
        }
    }
}
