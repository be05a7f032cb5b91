//! Error types for the commandkit library
//!
//! Most "not found" conditions are soft (return `None`/empty) rather than
//! errors; the variants here cover the hard failures: bad arguments, bad
//! outcome values, use-after-close, and storage failures surfaced unchanged.

use thiserror::Error;

/// Library error taxonomy
#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input: unknown logical path name, malformed time window, etc.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An execution outcome string that is not one of success/failure/partial/started
    #[error("invalid outcome: {0:?} (expected success, failure, partial, or started)")]
    InvalidOutcome(String),

    /// Operation attempted after `close()`
    #[error("learning store is closed")]
    StoreClosed,

    /// Underlying SQLite failure, surfaced unchanged
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure, surfaced unchanged
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Parameter serialization failure
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
