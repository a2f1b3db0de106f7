use std::path::PathBuf;

use hive_model::ModelError;
use hive_store::StoreError;
use hive_types::{ManifestKey, ObjectId, TypeError};
use hive_view::ViewError;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// No manifest has the requested key.
    #[error("manifest not found: {0}")]
    ManifestNotFound(ManifestKey),

    /// Manifests are immutable; the key is already taken.
    #[error("manifest already exists: {0}")]
    ManifestExists(ManifestKey),

    /// An object the operation depends on is absent.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A path inside a manifest does not name a file.
    #[error("no file {path} in manifest {key}")]
    EntryNotFound { key: ManifestKey, path: String },

    /// Content required by the operation is missing or damaged.
    #[error("incomplete content for {context}: {count} object(s) unavailable")]
    Incomplete { context: String, count: usize },

    /// Stored bytes do not hash to the id they are stored under.
    #[error("object {id} is damaged: content hashes to {actual}")]
    Damaged { id: ObjectId, actual: ObjectId },

    /// A filesystem path that cannot be imported or exported.
    #[error("invalid path {}: {reason}", path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// A store taking part in pool reorganization does not read through
    /// that pool.
    #[error("store {0} is not joined to this pool")]
    NotInPool(String),

    /// Configuration could not be read or written.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for OpsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ManifestExists(key) => Self::ManifestExists(key),
            StoreError::NotFound(id) => Self::ObjectNotFound(id),
            other => Self::Store(other),
        }
    }
}

impl From<ViewError> for OpsError {
    fn from(e: ViewError) -> Self {
        match e {
            ViewError::ManifestNotFound(key) => Self::ManifestNotFound(key),
            ViewError::Store(inner) => inner.into(),
            ViewError::Model(inner) => Self::Model(inner),
        }
    }
}

/// Result alias for store operations.
pub type OpsResult<T> = Result<T, OpsError>;
