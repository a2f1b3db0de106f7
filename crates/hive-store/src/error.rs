use std::path::PathBuf;
use std::time::Duration;

use hive_model::ModelError;
use hive_types::{ManifestKey, ObjectId};

/// Errors from object and manifest storage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    /// Manifests are immutable; a key can only be inserted once.
    #[error("manifest already exists: {0}")]
    ManifestExists(ManifestKey),

    /// A key that the backend cannot map onto its storage layout.
    #[error("invalid key {key}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// Mutator called on a read-only variant.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The directory lock could not be acquired in time.
    #[error("timed out after {timeout:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    /// Locks or transactions used out of order.
    #[error("lock misuse: {0}")]
    LockMisuse(String),

    /// Serialization or deserialization failure of a stored record.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
