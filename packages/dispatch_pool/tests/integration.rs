//! Integration tests for the worker pool and the sync bridge.
//!
//! These tests verify full pool functionality with real threads. They are ignored under Miri
//! because Miri does not support thread spawning at the scale these tests need.

use std::num::NonZero;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use dispatch_pool::{Error, FifoDispatcher, LifoDispatcher, PoolHandle, WorkerPool};
use testing::{wait_until, with_watchdog};

fn wait_for_idle(pool: &WorkerPool) {
    wait_until(|| pool.stats().active_threads == 0);
}

#[cfg_attr(miri, ignore)]
#[test]
fn pool_never_exceeds_max_threads() {
    with_watchdog(|| {
        let pool = WorkerPool::builder()
            .max_threads(NonZero::new(2).unwrap())
            .build();
        let handle = pool.handle();
        let peak_live = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();

        let start = Instant::now();

        for _ in 0..5 {
            let handle = handle.clone();
            let peak_live = Arc::clone(&peak_live);
            let done_tx = done_tx.clone();

            pool.submit(move || {
                peak_live.fetch_max(handle.stats().live_threads, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(50));
                done_tx.send(()).unwrap();
            });

            assert!(pool.stats().live_threads <= 2);
        }

        for _ in 0..5 {
            done_rx.recv().unwrap();
        }

        let elapsed = start.elapsed();

        // Five 50 ms tasks on two threads take three rounds.
        assert!(elapsed >= Duration::from_millis(150), "elapsed: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "elapsed: {elapsed:?}");
        assert_eq!(peak_live.load(Ordering::Relaxed), 2);
        assert_eq!(pool.stats().live_threads, 2);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn idle_threads_are_reused() {
    with_watchdog(|| {
        let pool = WorkerPool::new();
        let (done_tx, done_rx) = mpsc::channel();

        let run_burst = |size: usize| {
            for _ in 0..size {
                let done_tx = done_tx.clone();
                pool.submit(move || {
                    thread::sleep(Duration::from_millis(20));
                    done_tx.send(()).unwrap();
                });
            }

            for _ in 0..size {
                done_rx.recv().unwrap();
            }
        };

        run_burst(8);
        wait_for_idle(&pool);
        let after_first_burst = pool.stats().live_threads;
        assert!(after_first_burst <= 8);

        run_burst(8);
        wait_for_idle(&pool);
        let after_second_burst = pool.stats().live_threads;

        assert_eq!(after_second_burst, after_first_burst);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn sync_returns_exact_result() {
    with_watchdog(|| {
        assert_eq!(FifoDispatcher::global().sync(|| 42), 42);
        assert_eq!(LifoDispatcher::global().sync(|| "lifo"), "lifo");
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn sync_failable_preserves_error_identity() {
    #[derive(Debug)]
    struct Failure {
        token: Arc<()>,
    }

    with_watchdog(|| {
        let token = Arc::new(());
        let failure = Failure {
            token: Arc::clone(&token),
        };

        let result: Result<(), Failure> =
            FifoDispatcher::new_serial().sync_failable(move || Err(failure));

        let returned = result.unwrap_err();
        assert!(Arc::ptr_eq(&returned.token, &token));
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn global_dispatcher_references_share_pending_work() {
    with_watchdog(|| {
        let first = FifoDispatcher::global();
        let second = FifoDispatcher::global();
        let (tx, rx) = mpsc::channel();

        first.dispatch(move || tx.send("from first reference").unwrap());

        let observed = second.sync(move || rx.recv().unwrap());
        assert_eq!(observed, "from first reference");
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn nested_sync_from_worker() {
    with_watchdog(|| {
        let outer = FifoDispatcher::new();
        let inner = LifoDispatcher::new_serial();

        let result = outer.sync(move || inner.sync(|| 21) * 2);

        assert_eq!(result, 42);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn dispatchers_on_private_pool() {
    with_watchdog(|| {
        let pool = WorkerPool::builder()
            .max_threads(NonZero::new(4).unwrap())
            .build();
        let fifo = FifoDispatcher::builder()
            .serial(true)
            .pool(pool.handle())
            .build();
        let lifo = LifoDispatcher::builder().pool(pool.handle()).build();

        let total: u32 = (1..=10)
            .map(|i| if i % 2 == 0 { fifo.sync(move || i) } else { lifo.sync(move || i) })
            .sum();

        assert_eq!(total, 55);
        assert!(pool.stats().live_threads <= 4);
        assert_eq!(PoolHandle::global().stats().max_threads, 256);
    });
}

#[cfg_attr(miri, ignore)]
#[test]
fn shutdown_releases_sync_waiters() {
    with_watchdog(|| {
        let pool = WorkerPool::new();
        let dispatcher = FifoDispatcher::builder().pool(pool.handle()).build();

        assert_eq!(dispatcher.try_sync(|| 1).unwrap(), 1);

        pool.shutdown();

        assert!(matches!(dispatcher.try_sync(|| 2), Err(Error::Abandoned)));
        assert_eq!(dispatcher.pending(), 0);
    });
}
