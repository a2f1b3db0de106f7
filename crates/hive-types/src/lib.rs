//! Foundation types for the Hive object store.
//!
//! Every other Hive crate depends on `hive-types`. The types here are plain
//! immutable values: they carry no handles into storage.
//!
//! # Key Types
//!
//! - [`ObjectId`] -- Content-addressed identifier (BLAKE3 hash of the raw bytes)
//! - [`ObjectIdHasher`] -- Incremental hasher producing an [`ObjectId`] from a stream
//! - [`ManifestKey`] -- `name:tag` identity of a manifest

pub mod error;
pub mod key;
pub mod object;

pub use error::TypeError;
pub use key::ManifestKey;
pub use object::{ObjectId, ObjectIdHasher};
