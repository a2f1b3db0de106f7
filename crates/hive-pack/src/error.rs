use hive_ops::OpsError;
use hive_store::StoreError;
use hive_types::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("invalid bundle magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported bundle version: {0}")]
    UnsupportedVersion(u32),

    #[error("bundle checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt bundle entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for entry at offset {offset}")]
    CrcMismatch { offset: u64 },

    #[error("object {expected} in bundle hashes to {actual}")]
    HashMismatch { expected: ObjectId, actual: ObjectId },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ops(#[from] OpsError),
}

pub type PackResult<T> = Result<T, PackError>;
