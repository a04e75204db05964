//! Handles for submitting tasks to a worker pool.

use std::sync::{Arc, LazyLock};

use crate::{PoolInner, PoolStats, Task, WorkerPool};

/// The pool behind [`PoolHandle::global()`]. Never shut down.
static GLOBAL_POOL: LazyLock<WorkerPool> =
    LazyLock::new(|| WorkerPool::builder().name("dispatch-global").build());

/// A handle for submitting tasks to a [`WorkerPool`].
///
/// Handles are cheaply cloneable and can be shared across threads. All clones reference the
/// same underlying pool. Dispatchers hold one of these to reach the pool they execute on.
#[derive(Clone, Debug)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

impl PoolHandle {
    pub(crate) fn new(inner: Arc<PoolInner>) -> Self {
        Self { inner }
    }

    /// Returns a handle to the process-wide default pool.
    ///
    /// The default pool is created on first use with the default configuration (up to 256
    /// worker threads) and lives for the rest of the process. Every dispatcher that is not
    /// explicitly given a pool executes on it.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_POOL.handle()
    }

    /// Enqueues a task for execution on one of the pool's worker threads.
    ///
    /// See [`WorkerPool::submit()`].
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_boxed(Box::new(task));
    }

    pub(crate) fn submit_boxed(&self, task: Task) {
        self.inner.submit(task);
    }

    /// Returns a snapshot of the pool's thread accounting.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    /// Whether the pool has been shut down. Tasks submitted to a shut down pool are discarded.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.inner.pool_id
    }
}
