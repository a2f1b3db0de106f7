//! Operations of the Hive object store.
//!
//! Every operation is a function taking the store context ([`Hive`]) and
//! its parameters, returning a typed result or an [`OpsError`]. Mutating
//! operations run inside a write scope of the store and leave a line in its
//! audit log.
//!
//! # Modules
//!
//! - [`import`] / [`export`] -- filesystem in, filesystem out
//! - [`manifest`] -- list, load, delete, numeric tag allocation, retention
//! - [`scan`] -- tree snapshots, reference closure, single-file reads
//! - [`check`] -- object-level and manifest-level consistency checks
//! - [`prune`] -- mark-and-sweep collection of unreachable objects
//! - [`copy`] -- manifests and their objects between two stores
//! - [`verify`] -- a manifest against a live directory
//! - [`lock`] -- explicit directory locks
//! - [`meta`] -- typed metadata records attached to manifests
//! - [`pool`] -- shared object pools and their reorganization
//! - [`required`] -- reachability queries shared with replication

pub mod check;
pub mod config;
pub mod copy;
pub mod error;
pub mod export;
pub mod hive;
pub mod import;
pub mod lock;
pub mod manifest;
pub mod meta;
pub mod pool;
pub mod prune;
pub mod required;
pub mod scan;
pub mod verify;

pub use check::{fsck, manifest_check, object_check, FsckReport, ManifestCheckReport, ObjectCheckReport};
pub use config::HiveConfig;
pub use copy::{copy, CopyReport};
pub use error::{OpsError, OpsResult};
pub use export::{export, ExportReport};
pub use hive::Hive;
pub use import::{import_bytes, import_directory, insert_tree};
pub use lock::{directory_lock, directory_release};
pub use meta::{cleanup_dead_metas, MetaBinding, MetaManifest};
pub use pool::{reorganize, ObjectPool, ReorganizeReport};
pub use prune::{prune, PruneReport};
pub use required::{manifest_inventory, missing_objects, required_objects, required_trees};
pub use verify::{verify, VerifyEntry, VerifyReport, VerifyStatus};
