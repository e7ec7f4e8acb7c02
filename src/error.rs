//! Error types for posture-agent.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Snapshot generation failed. Fatal for the cycle, nothing is spooled.
    #[error("snapshot production failed: {0}")]
    Producer(String),

    /// A delivery attempt failed (network error or non-2xx status).
    #[error("delivery failed: {0}")]
    Transport(String),

    /// Disk I/O failure while writing or removing spool records.
    #[error("spool persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// A spool record that could not be read back.
    #[error("corrupt spool record {}: {reason}", path.display())]
    CorruptRecord { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The shutdown signal fired while waiting on a cancellable operation.
    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
