//! Error types for the benchgrid state store.

use std::time::Duration;

use bench_core::{QuotaKind, Target};
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("quota {scope}:{kind} is not available")]
    QuotaUnavailable { scope: Target, kind: QuotaKind },

    #[error("timed out after {waited:?} waiting for lock {key}")]
    LockTimeout { key: String, waited: Duration },

    #[error("lock {0} was lost while held")]
    LockLost(String),

    #[error("cancelled while waiting for lock {0}")]
    Cancelled(String),
}
