//! Dispatchers: admission and ordering policy on top of a worker pool.

use std::any::type_name;
use std::fmt;
use std::iter;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{Fifo, Lifo, PoolHandle, Task, TaskSelector, run_detached};

/// A dispatcher that runs the earliest admitted pending task first.
pub type FifoDispatcher = Dispatcher<Fifo>;

/// A dispatcher that runs the most recently admitted pending task first.
pub type LifoDispatcher = Dispatcher<Lifo>;

static GLOBAL_FIFO: LazyLock<FifoDispatcher> = LazyLock::new(FifoDispatcher::new);

static GLOBAL_LIFO: LazyLock<LifoDispatcher> = LazyLock::new(LifoDispatcher::new);

struct DispatchState<S> {
    selector: S,

    /// Serial mode only: a drain step is scheduled, running or rescheduling itself.
    draining: bool,
}

struct DispatcherInner<S: TaskSelector> {
    serial: bool,
    state: Mutex<DispatchState<S>>,
    pool: PoolHandle,
}

impl<S: TaskSelector> DispatcherInner<S> {
    /// Runs one pending task and, in serial mode, either schedules the next drain step or
    /// marks the dispatcher idle.
    fn drain_once(self: &Arc<Self>) {
        let task = self.state.lock().selector.select_next();

        // Every drain step is paired with exactly one admitted task, so the pending list is
        // only empty here if that task was already abandoned.
        if let Some(task) = task {
            run_detached(task);
        }

        if !self.serial {
            return;
        }

        let rearm = {
            let mut state = self.state.lock();

            if state.selector.is_empty() {
                state.draining = false;
                false
            } else {
                true
            }
        };

        if rearm {
            trace!(pool_id = self.pool_id(), "serial dispatcher continues draining");
            DrainStep::schedule(self);
        }
    }

    /// Called when the pool discards a drain step without running it (the pool was shut
    /// down). Drops the tasks that step was responsible for, releasing anyone waiting on them.
    fn abandon(&self) {
        let abandoned: Vec<Task> = {
            let mut state = self.state.lock();

            if self.serial {
                state.draining = false;
                iter::from_fn(|| state.selector.select_next()).collect()
            } else {
                state.selector.select_next().into_iter().collect()
            }
        };

        debug!(
            pool_id = self.pool_id(),
            abandoned_tasks = abandoned.len(),
            "worker pool discarded a drain step, abandoning pending tasks"
        );

        drop(abandoned);
    }

    fn pool_id(&self) -> u64 {
        self.pool.pool_id()
    }
}

/// One scheduled execution of a dispatcher, as handed to the worker pool.
///
/// If the pool drops the step without running it, the dispatcher abandons the matching work.
struct DrainStep<S: TaskSelector> {
    dispatcher: Option<Arc<DispatcherInner<S>>>,
}

impl<S: TaskSelector> DrainStep<S> {
    fn schedule(dispatcher: &Arc<DispatcherInner<S>>) {
        let step = Self {
            dispatcher: Some(Arc::clone(dispatcher)),
        };

        dispatcher.pool.submit_boxed(Box::new(move || step.run()));
    }

    fn run(mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.drain_once();
        }
    }
}

impl<S: TaskSelector> Drop for DrainStep<S> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abandon();
        }
    }
}

/// Admits tasks and hands them to a worker pool according to an ordering and a concurrency
/// policy.
///
/// The ordering policy is the selector type `S`: [`Fifo`] runs the earliest admitted pending
/// task next, [`Lifo`] the most recently admitted one.
///
/// The concurrency policy is chosen at construction:
///
/// * **Concurrent** (default): every admitted task becomes its own pool submission, so tasks
///   overlap freely. Only the order in which tasks are handed to the pool is defined.
/// * **Serial**: at most one task of this dispatcher runs at any time. A serial [`Fifo`]
///   dispatcher runs tasks in strict admission order. A serial [`Lifo`] dispatcher runs, at each
///   step, the most recently admitted task that is still pending.
///
/// Unless configured otherwise, dispatchers execute on the process-wide pool returned by
/// [`PoolHandle::global()`].
///
/// # Cloning
///
/// Dispatchers are cheaply cloneable handles. All clones share the same pending list and
/// serial state.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
///
/// use dispatch_pool::FifoDispatcher;
///
/// let dispatcher = FifoDispatcher::new_serial();
/// let log = Arc::new(Mutex::new(Vec::new()));
///
/// for i in 1..=3 {
///     let log = Arc::clone(&log);
///     dispatcher.dispatch(move || log.lock().unwrap().push(i));
/// }
///
/// // Serial dispatchers also order the sync bridge behind earlier tasks.
/// let entries = dispatcher.sync(move || log.lock().unwrap().clone());
/// assert_eq!(entries, vec![1, 2, 3]);
/// ```
pub struct Dispatcher<S: TaskSelector> {
    inner: Arc<DispatcherInner<S>>,
}

impl<S: TaskSelector> Dispatcher<S> {
    /// Creates a concurrent dispatcher executing on the process-wide pool.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a serial dispatcher executing on the process-wide pool.
    #[must_use]
    pub fn new_serial() -> Self {
        Self::builder().serial(true).build()
    }

    /// Creates a builder for configuring the dispatcher.
    #[must_use]
    pub fn builder() -> DispatcherBuilder<S> {
        DispatcherBuilder::new()
    }

    /// Admits a fire-and-forget task.
    ///
    /// Never blocks beyond briefly taking the dispatcher and pool locks. The task has no way
    /// to report a failure to the caller; it is expected to handle its own errors.
    ///
    /// # Panics
    ///
    /// A panic escaping the task is caught and logged via `tracing::error!`. It does not
    /// propagate and does not stop a serial dispatcher from running its remaining tasks.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatch_boxed(Box::new(task));
    }

    fn dispatch_boxed(&self, task: Task) {
        let schedule = {
            let mut state = self.inner.state.lock();
            state.selector.push(task);

            if !self.inner.serial {
                true
            } else if state.draining {
                // The drain step already in flight will pick this task up.
                false
            } else {
                state.draining = true;
                true
            }
        };

        if schedule {
            DrainStep::schedule(&self.inner);
        }
    }

    /// Whether this dispatcher runs its tasks one at a time.
    #[must_use]
    pub fn is_serial(&self) -> bool {
        self.inner.serial
    }

    /// The number of admitted tasks that have not been selected for execution yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().selector.len()
    }
}

impl Dispatcher<Fifo> {
    /// Returns the process-wide concurrent FIFO dispatcher.
    ///
    /// Every call returns a handle to the same dispatcher and pending list.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_FIFO.clone()
    }
}

impl Dispatcher<Lifo> {
    /// Returns the process-wide concurrent LIFO dispatcher.
    ///
    /// Every call returns a handle to the same dispatcher and pending list.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_LIFO.clone()
    }
}

impl<S: TaskSelector> Clone for Dispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: TaskSelector> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TaskSelector> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pending, draining) = {
            let state = self.inner.state.lock();
            (state.selector.len(), state.draining)
        };

        f.debug_struct(type_name::<Self>())
            .field("serial", &self.inner.serial)
            .field("draining", &draining)
            .field("pending", &pending)
            .field("pool", &self.inner.pool)
            .finish()
    }
}

/// Builder for configuring a [`Dispatcher`].
pub struct DispatcherBuilder<S: TaskSelector> {
    serial: bool,
    pool: Option<PoolHandle>,
    _selector: PhantomData<fn() -> S>,
}

impl<S: TaskSelector> DispatcherBuilder<S> {
    fn new() -> Self {
        Self {
            serial: false,
            pool: None,
            _selector: PhantomData,
        }
    }

    /// Sets whether the dispatcher runs its tasks one at a time.
    ///
    /// Default is `false` (concurrent).
    #[must_use]
    pub fn serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }

    /// Sets the pool the dispatcher executes its tasks on.
    ///
    /// Default is the process-wide pool from [`PoolHandle::global()`].
    #[must_use]
    pub fn pool(mut self, pool: PoolHandle) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Builds the dispatcher with the configured settings.
    #[must_use]
    pub fn build(self) -> Dispatcher<S> {
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                serial: self.serial,
                state: Mutex::new(DispatchState {
                    selector: S::default(),
                    draining: false,
                }),
                pool: self.pool.unwrap_or_else(PoolHandle::global),
            }),
        }
    }
}

impl<S: TaskSelector> fmt::Debug for DispatcherBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("serial", &self.serial)
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::num::NonZero;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use static_assertions::assert_impl_all;
    use testing::{DropTracker, wait_until, with_watchdog};

    use super::*;
    use crate::WorkerPool;

    assert_impl_all!(FifoDispatcher: Send, Sync, Clone);
    assert_impl_all!(LifoDispatcher: Send, Sync, Clone);

    fn is_draining<S: TaskSelector>(dispatcher: &Dispatcher<S>) -> bool {
        dispatcher.inner.state.lock().draining
    }

    #[test]
    fn builder_defaults_to_concurrent() {
        let dispatcher = FifoDispatcher::builder().build();

        assert!(!dispatcher.is_serial());
        assert_eq!(dispatcher.pending(), 0);
    }

    #[test]
    fn new_serial_is_serial() {
        assert!(LifoDispatcher::new_serial().is_serial());
        assert!(!LifoDispatcher::new().is_serial());
    }

    #[test]
    fn global_dispatchers_share_state() {
        let first = FifoDispatcher::global();
        let second = FifoDispatcher::global();
        assert!(Arc::ptr_eq(&first.inner, &second.inner));

        let first = LifoDispatcher::global();
        let second = LifoDispatcher::global();
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
        assert!(!first.is_serial());
    }

    #[test]
    fn clones_share_state() {
        let dispatcher = FifoDispatcher::new_serial();
        let clone = dispatcher.clone();

        assert!(Arc::ptr_eq(&dispatcher.inner, &clone.inner));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn dispatch_runs_on_configured_pool() {
        with_watchdog(|| {
            let pool = WorkerPool::builder().name("configured").build();
            let dispatcher = FifoDispatcher::builder().pool(pool.handle()).build();
            let (tx, rx) = mpsc::channel();

            dispatcher.dispatch(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            });

            let name = rx.recv().unwrap().unwrap();
            assert!(name.starts_with("configured-w"));
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn serial_dispatcher_returns_to_idle() {
        with_watchdog(|| {
            let dispatcher = FifoDispatcher::new_serial();
            let (tx, rx) = mpsc::channel();

            for i in 0..10 {
                let tx = tx.clone();
                dispatcher.dispatch(move || tx.send(i).unwrap());
            }

            let received: Vec<_> = (0..10).map(|_| rx.recv().unwrap()).collect();
            assert_eq!(received, (0..10).collect::<Vec<_>>());

            wait_until(|| !is_draining(&dispatcher));
            assert_eq!(dispatcher.pending(), 0);

            // Idle again, so the next admission starts a fresh drain chain.
            dispatcher.dispatch(move || tx.send(10).unwrap());
            assert_eq!(rx.recv().unwrap(), 10);
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn serial_dispatcher_never_overlaps() {
        with_watchdog(|| {
            let dispatcher = LifoDispatcher::new_serial();
            let running = Arc::new(AtomicUsize::new(0));
            let max_running = Arc::new(AtomicUsize::new(0));
            let (tx, rx) = mpsc::channel();

            for _ in 0..20 {
                let running = Arc::clone(&running);
                let max_running = Arc::clone(&max_running);
                let tx = tx.clone();

                dispatcher.dispatch(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    running.fetch_sub(1, Ordering::SeqCst);
                    tx.send(()).unwrap();
                });
            }

            for _ in 0..20 {
                rx.recv().unwrap();
            }

            assert_eq!(max_running.load(Ordering::SeqCst), 1);
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn panic_does_not_wedge_serial_dispatcher() {
        with_watchdog(|| {
            let dispatcher = FifoDispatcher::new_serial();
            let (tx, rx) = mpsc::channel();

            dispatcher.dispatch(|| panic!("intentional panic in serial dispatcher"));
            dispatcher.dispatch(move || tx.send("after panic").unwrap());

            assert_eq!(rx.recv().unwrap(), "after panic");
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn pool_shutdown_abandons_serial_backlog() {
        with_watchdog(|| {
            let pool = WorkerPool::builder()
                .max_threads(NonZero::new(1).unwrap())
                .build();
            let dispatcher = FifoDispatcher::builder()
                .serial(true)
                .pool(pool.handle())
                .build();
            let tracker = DropTracker::new();
            let executed = Arc::new(AtomicUsize::new(0));

            // Occupy the only worker so the drain step stays queued in the pool.
            pool.block_worker_until_shutdown();

            for _ in 0..3 {
                let token = tracker.token();
                let executed = Arc::clone(&executed);
                dispatcher.dispatch(move || {
                    let _token = token;
                    executed.fetch_add(1, Ordering::Relaxed);
                });
            }
            assert_eq!(dispatcher.pending(), 3);
            assert!(is_draining(&dispatcher));

            pool.shutdown();

            assert_eq!(executed.load(Ordering::Relaxed), 0);
            assert_eq!(tracker.dropped(), 3);
            assert_eq!(dispatcher.pending(), 0);
            assert!(!is_draining(&dispatcher));

            // Admissions after shutdown are abandoned right away.
            let token = tracker.token();
            dispatcher.dispatch(move || drop(token));
            assert_eq!(tracker.dropped(), 4);
            assert_eq!(dispatcher.pending(), 0);
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn pool_shutdown_abandons_concurrent_tasks_one_per_step() {
        with_watchdog(|| {
            let pool = WorkerPool::builder()
                .max_threads(NonZero::new(1).unwrap())
                .build();
            let dispatcher = LifoDispatcher::builder().pool(pool.handle()).build();
            let tracker = DropTracker::new();

            pool.block_worker_until_shutdown();

            for _ in 0..4 {
                let token = tracker.token();
                dispatcher.dispatch(move || drop(token));
            }
            assert_eq!(pool.stats().queued_tasks, 4);

            drop(pool);

            assert_eq!(tracker.dropped(), 4);
            assert_eq!(dispatcher.pending(), 0);
        });
    }
}
