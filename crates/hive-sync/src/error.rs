use hive_ops::OpsError;
use hive_pack::PackError;
use hive_store::StoreError;
use hive_types::ManifestKey;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unsupported remote scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid remote address: {0}")]
    InvalidAddress(String),

    #[error("manifest not found on remote: {0}")]
    ManifestNotFound(ManifestKey),

    #[error("{context}: {count} object(s) unavailable")]
    Incomplete { context: String, count: usize },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("pack error: {0}")]
    Pack(#[from] PackError),

    #[error(transparent)]
    Ops(#[from] OpsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
