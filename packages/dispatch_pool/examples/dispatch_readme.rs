//! Basic usage of pools, dispatchers and the sync bridge.

use std::num::NonZero;

use dispatch_pool::{FifoDispatcher, LifoDispatcher, WorkerPool};

fn main() {
    // Pool and dispatcher activity is logged at debug and trace level.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let answer = FifoDispatcher::global().sync(|| 6 * 7);
    assert_eq!(answer, 42);

    let pool = WorkerPool::builder()
        .name("readme")
        .max_threads(NonZero::new(4).unwrap())
        .build();

    let serial = LifoDispatcher::builder()
        .serial(true)
        .pool(pool.handle())
        .build();

    serial.dispatch(|| println!("doing some stuff"));

    let parsed: Result<u32, std::num::ParseIntError> = serial.sync_failable(|| "17".parse());
    assert_eq!(parsed, Ok(17));

    println!("pool stats: {:?}", pool.stats());

    // Anything still queued on the private pool is discarded here.
    drop(pool);
}
