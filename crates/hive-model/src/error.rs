use hive_types::TypeError;

/// Errors from building, encoding, or decoding model values.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Two tree entries share a name (regardless of their types).
    #[error("duplicate tree entry name: {0}")]
    DuplicateEntry(String),

    /// A tree entry name cannot be represented in the tree encoding.
    #[error("invalid tree entry name {name:?}: {reason}")]
    InvalidEntryName { name: String, reason: String },

    /// A persisted tree line could not be parsed.
    #[error("malformed tree line {line}: {reason}")]
    MalformedTree { line: usize, reason: String },

    /// A manifest was built without a root tree.
    #[error("manifest {0} has no root tree")]
    MissingRoot(String),

    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("decoding failed: {0}")]
    Decoding(String),

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Result alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
