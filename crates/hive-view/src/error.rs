use hive_model::ModelError;
use hive_store::StoreError;
use hive_types::ManifestKey;

/// Errors that prevent a scan from running at all.
///
/// Missing or damaged objects are not errors: they appear as elements of the
/// resulting view.
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    /// The manifest to scan does not exist.
    #[error("manifest not found: {0}")]
    ManifestNotFound(ManifestKey),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for view operations.
pub type ViewResult<T> = Result<T, ViewError>;
