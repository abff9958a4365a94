//! Storage error types

use thiserror::Error;

/// Errors raised by a storage backend.
///
/// Every variant carries the backend's own description of the failure so the
/// original cause survives propagation through the model layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    /// The storage engine is not available in this environment
    #[error("storage not available: {0}")]
    NotAvailable(String),

    /// Opening the database failed
    #[error("failed to open database '{database}': {cause}")]
    Open { database: String, cause: String },

    /// A version upgrade is blocked by connections still holding an older version
    #[error(
        "open of '{database}' at version {requested} is blocked by an open connection at version {current}"
    )]
    Blocked {
        database: String,
        requested: u32,
        current: u32,
    },

    /// Deleting the database is blocked by open connections
    #[error("delete of '{database}' is blocked by {connections} open connection(s)")]
    DeleteBlocked { database: String, connections: usize },

    /// Requested version is lower than the stored version
    #[error("cannot open '{database}' at version {requested}: stored version is {current}")]
    VersionMismatch {
        database: String,
        requested: u32,
        current: u32,
    },

    /// Object store does not exist in the catalogue
    #[error("object store not found: {0}")]
    StoreNotFound(String),

    /// Key or unique index constraint violated
    #[error("constraint violated in '{store}': {cause}")]
    Constraint { store: String, cause: String },

    /// Row cannot be stored (missing key, invalid key value)
    #[error("invalid data for '{store}': {cause}")]
    Data { store: String, cause: String },

    /// Write attempted in a read-only transaction
    #[error("read-only transaction cannot write to '{0}'")]
    ReadOnly(String),

    /// Store is outside the transaction's scope
    #[error("store '{0}' is not part of this transaction")]
    OutOfScope(String),

    /// Transaction already finished
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// Transaction was aborted
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// The connection was closed
    #[error("connection to '{0}' is closed")]
    ConnectionClosed(String),

    /// Any other request failure reported by the backend
    #[error("{operation} failed: {cause}")]
    Request {
        operation: &'static str,
        cause: String,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
