//! Error types at each crate boundary.
//!
//! Each enum distinguishes recoverable attempt-scoped failures from the
//! handful of conditions that are fatal to a worker process, per the error
//! handling design: everything here is matched on its variant, never on a
//! formatted string.

use thiserror::Error;

/// Errors raised by a state store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} is not a valid job status")]
    InvalidStatus(String),

    #[error("job {0} not found")]
    NotFound(i64),

    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(#[source] anyhow::Error),
}

/// Errors raised by a dispatch layer implementation.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatch substrate unavailable: {0}")]
    Unavailable(String),

    #[error("dispatch operation failed: {0}")]
    Operation(#[source] anyhow::Error),
}

/// Errors raised by the handler registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("handler for job type {0:?} does not conform to the executor contract")]
    NonConforming(String),

    #[error("no handler registered for job type: {0}")]
    HandlerNotRegistered(String),
}

/// Errors surfaced by [`crate::dispatcher::Dispatcher`].
#[derive(Error, Debug)]
pub enum DispatcherError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Errors that can terminate a worker process outright, as opposed to
/// being absorbed into the per-attempt failure path.
#[derive(Error, Debug)]
pub enum WorkerFatalError {
    #[error("failed to acquire singleton lock at {path}: {source}")]
    LockUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no dispatch substrate configured")]
    NoDispatchLayer,
}
