//! Bundle format of the Hive object store.
//!
//! A bundle is a single file carrying objects and manifest records between
//! stores that share no filesystem. Entries are zstd-compressed, each with
//! its own CRC32, and the whole file is sealed with a BLAKE3 checksum. See
//! [`BundleWriter`] for the byte layout.
//!
//! # Key Types
//!
//! - [`BundleWriter`] -- collects objects and manifests, writes a bundle
//! - [`BundleReader`] -- validates and indexes a bundle, reads entries back
//! - [`BundleIndex`] -- fan-out index over the object entries
//! - [`apply_bundle`] / [`bundle_from_store`] -- store integration

pub mod entry;
pub mod error;
pub mod index;
pub mod reader;
pub mod transfer;
pub mod writer;

pub use entry::EntryKind;
pub use error::{PackError, PackResult};
pub use index::BundleIndex;
pub use reader::BundleReader;
pub use transfer::{apply_bundle, bundle_from_store, ApplyReport};
pub use writer::{BundleFile, BundleWriter, BUNDLE_MAGIC, BUNDLE_VERSION};
