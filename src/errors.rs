use std::{error::Error as StdError, io};
use thiserror::Error;

/// Error type a processor closure may return for a single work item.
pub type ProcessError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced synchronously to the caller of a pool operation.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("failed to spawn worker thread for pool `{pool}`: {source}")]
    Spawn {
        pool: String,
        #[source]
        source: io::Error,
    },
}

/// Why a work item did not complete. Logged and counted by the pool, never
/// returned to the producer.
#[derive(Debug, Error)]
pub enum ItemFailure {
    #[error("processor returned an error: {0}")]
    Error(ProcessError),

    #[error("processor panicked: {0}")]
    Panicked(String),
}

/// Outcome of a job submitted through a [`JoinHandle`](crate::handle::JoinHandle).
#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum SpawnError {
    #[error("job panicked: {0}")]
    Panic(String),

    #[error("job was cancelled before it started")]
    Cancelled,

    #[error("job was dropped without running")]
    ChannelClosed,

    #[error("timed out waiting for job")]
    Timeout,
}
