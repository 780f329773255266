//! Error types for Keystone
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::txn::TxnId;

/// Result type alias using KeystoneError
pub type Result<T> = std::result::Result<T, KeystoneError>;

/// Unified error type for Keystone operations
#[derive(Debug, Error)]
pub enum KeystoneError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// A log or item-store write failed. Once raised by the log manager the
    /// log is halted and every later append/flush fails the same way.
    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt log: {0}")]
    CorruptLog(String),

    // -------------------------------------------------------------------------
    // Concurrency Control Errors
    // -------------------------------------------------------------------------
    #[error("Transaction {txn_id} was chosen as deadlock victim")]
    Deadlock { txn_id: TxnId },

    #[error("Transaction {txn_id} timed out waiting for a lock on {key}")]
    LockTimeout { txn_id: TxnId, key: String },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KeystoneError {
    /// Whether the caller may simply retry the whole transaction.
    ///
    /// Deadlock victims and lock timeouts have already been aborted by the
    /// transaction manager when this error reaches the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KeystoneError::Deadlock { .. } | KeystoneError::LockTimeout { .. })
    }
}

impl From<bincode::Error> for KeystoneError {
    fn from(err: bincode::Error) -> Self {
        KeystoneError::Serialization(err.to_string())
    }
}
