//! Pool accounting snapshots.

/// A point-in-time view of the thread accounting of a [`WorkerPool`][crate::WorkerPool].
///
/// All fields are captured under the same lock, so within one snapshot
/// `active_threads <= live_threads <= max_threads` always holds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolStats {
    /// The most worker threads the pool will ever spawn.
    pub max_threads: usize,

    /// Worker threads spawned so far. Threads are never reclaimed while the pool runs.
    pub live_threads: usize,

    /// Worker threads currently executing a task.
    pub active_threads: usize,

    /// Tasks submitted to the pool that no worker has picked up yet.
    pub queued_tasks: usize,
}

impl PoolStats {
    /// Worker threads that are alive but not executing a task.
    #[must_use]
    pub fn idle_threads(&self) -> usize {
        self.live_threads.saturating_sub(self.active_threads)
    }
}
