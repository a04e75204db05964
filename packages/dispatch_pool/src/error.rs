//! Errors reported by the sync bridge.

use thiserror::Error;

/// Errors reported by the dispatch operations that can fail without the task itself failing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The task never ran because the worker pool behind the dispatcher was shut down before
    /// a worker could pick it up.
    #[error("the task was abandoned because the worker pool was shut down")]
    Abandoned,
}

/// A specialized `Result` type for dispatch operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
