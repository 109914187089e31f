//! Error taxonomy for the conversion pipeline.
//!
//! Only structural problems surface as `ConvertError` and abort the run.
//! Per-record, per-cell, and per-group problems are recorded as counters and
//! log events so one bad geography never aborts a multi-hour conversion.

use std::fmt;

/// Error type for the conversion pipeline
#[derive(Debug)]
pub enum ConvertError {
    /// Unparsable top-level input structure. Aborts the entire run.
    FatalInput {
        path: String,
        reason: String,
    },
    /// Bad or inconsistent configuration, detected before any work starts.
    Config(String),
    /// Database connectivity or statement failure.
    Database(String),
    /// Checkpoint file could not be read, written, or reconciled.
    Checkpoint {
        path: String,
        reason: String,
    },
    Io(std::io::Error),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::FatalInput { path, reason } => {
                write!(f, "Fatal input error in {}: {}", path, reason)
            }
            ConvertError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ConvertError::Database(msg) => write!(f, "Database error: {}", msg),
            ConvertError::Checkpoint { path, reason } => {
                write!(f, "Checkpoint error in {}: {}", path, reason)
            }
            ConvertError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for ConvertError {}

impl From<std::io::Error> for ConvertError {
    fn from(err: std::io::Error) -> Self {
        ConvertError::Io(err)
    }
}

impl From<diesel::result::Error> for ConvertError {
    fn from(err: diesel::result::Error) -> Self {
        ConvertError::Database(err.to_string())
    }
}

impl From<diesel::r2d2::PoolError> for ConvertError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        ConvertError::Database(err.to_string())
    }
}
