//! Immutable data model of the Hive object store.
//!
//! Objects in the store are opaque bytes; this crate gives those bytes
//! meaning. A [`Tree`] maps names to child objects, a [`Manifest`] names a
//! root tree under a `name:tag` key, and the [`CodecTable`] turns both into
//! bytes whose hash is stable across runs and library versions.
//!
//! # Design Rules
//!
//! 1. Values are immutable once built; builders enforce invariants.
//! 2. Logically identical trees serialize to identical bytes regardless of
//!    insertion order.
//! 3. `encode(decode(encode(x))) == encode(x)` for every registered type.

pub mod codec;
pub mod error;
pub mod manifest;
pub mod tree;

pub use codec::{CodecTable, ObjectCodec, TreeCodec};
pub use error::{ModelError, ModelResult};
pub use manifest::{Manifest, ManifestBuilder, ManifestRef};
pub use tree::{EntryType, Tree, TreeBuilder, TreeEntry, TreeKey};
