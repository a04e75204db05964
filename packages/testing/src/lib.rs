#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests, benchmarks and examples in this workspace.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout to turn deadlocks into test failures.
///
/// Most tests in this workspace block on worker threads. A scheduling bug shows up as a
/// hang, so the test body runs on a separate thread and the calling thread waits for it for
/// at most 10 seconds (60 seconds under Miri, where thread synchronization is much slower).
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly. This allows mutation testing to detect
/// hanging mutations through its own timeout.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode). A panic in the
/// test body is re-thrown on the calling thread.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the watchdog already gave up on us.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded {timeout:?} timeout, most likely a deadlock");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Polls `condition` every millisecond until it returns `true`.
///
/// Meant for state that settles shortly after the event a test waits for, such as a worker
/// thread updating its bookkeeping after a task has signaled completion. Combine with
/// [`with_watchdog()`] so a condition that never becomes true fails the test.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        thread::sleep(Duration::from_millis(1));
    }
}

/// Counts how many of its tokens have been dropped.
///
/// Moving a token into a task shows whether the task was consumed (run or discarded) without
/// the task having to do anything itself.
#[derive(Clone, Debug, Default)]
pub struct DropTracker {
    dropped: Arc<AtomicUsize>,
}

impl DropTracker {
    /// Creates a tracker with no tokens dropped yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that increments the tracker's count when dropped.
    #[must_use]
    pub fn token(&self) -> DropToken {
        DropToken {
            dropped: Arc::clone(&self.dropped),
        }
    }

    /// The number of tokens dropped so far.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// A token created by [`DropTracker::token()`].
#[derive(Debug)]
pub struct DropToken {
    dropped: Arc<AtomicUsize>,
}

impl Drop for DropToken {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}
