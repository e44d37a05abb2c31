//! Error types for pagelog
//!
//! Provides a unified error type for all log, page operation and tracker calls.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Unified error type for pagelog operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error in storage '{storage}' at {}: {source}", path.display())]
    IoAt {
        storage: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    Corruption(String),

    #[error("Unknown page operation kind: {0}")]
    UnknownPageOperation(u8),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Protocol Violations
    // -------------------------------------------------------------------------
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Page operation failed: {0}")]
    PageOperation(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("WAL is closed")]
    Closed,

    #[error("Shutdown failed: {0}")]
    Shutdown(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WalError {
    /// Wrap an I/O error with the storage name and file it happened on
    pub fn io_at(storage: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WalError::IoAt {
            storage: storage.into(),
            path: path.into(),
            source,
        }
    }

    /// Whether the failed call may simply be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, WalError::Interrupted(_))
    }
}

impl From<bincode::Error> for WalError {
    fn from(err: bincode::Error) -> Self {
        WalError::Serialization(err.to_string())
    }
}
