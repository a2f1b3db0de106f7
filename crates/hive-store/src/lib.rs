//! Storage layer of the Hive object store.
//!
//! Objects are immutable byte sequences addressed by the hash of their
//! content; manifests are small immutable records naming a root tree under a
//! `name:tag` key. This crate stores both and provides the concurrency
//! primitives that keep multi-object writes consistent.
//!
//! # Object Databases
//!
//! All backends implement [`ObjectDatabase`]:
//!
//! - [`InMemoryObjectDatabase`] -- `HashMap`-based store for tests and embedding
//! - [`FsObjectDatabase`] -- one file per object, fanned out by hash prefix
//! - [`ReadOnlyObjectDatabase`] -- read side of another database
//! - [`AugmentedObjectDatabase`] -- local writes layered over shared pools
//!
//! Manifests live in a [`ManifestDatabase`] ([`InMemoryManifestDatabase`],
//! [`FsManifestDatabase`]). The [`ObjectReferenceDatabase`] counts which
//! stores reference each pooled object.
//!
//! # Concurrency
//!
//! - [`Transactions`] -- re-entrant exclusive write scopes per store instance
//! - [`DirectoryLock`] -- cross-process lock with stale-holder recovery
//! - [`TaskSynchronizer`] -- single-flight execution keyed by token
//!
//! # Design Rules
//!
//! 1. Objects are never modified after they become visible.
//! 2. Stage, then rename: partial writes never appear under a final name.
//! 3. Absence is a value (`Ok(None)`), I/O failure is an error.
//! 4. Reads of committed objects take no locks.

pub mod audit;
pub mod error;
pub mod fs;
pub mod layered;
pub mod lock;
pub mod memory;
pub mod refcount;
pub mod single_flight;
pub mod traits;
pub mod transaction;

pub use audit::{AuditEntry, AuditLog};
pub use error::{StoreError, StoreResult};
pub use fs::{FsManifestDatabase, FsObjectDatabase};
pub use layered::{AugmentedObjectDatabase, ReadOnlyObjectDatabase};
pub use lock::{DirectoryLock, LockHandle, LockValidator};
pub use memory::{InMemoryManifestDatabase, InMemoryObjectDatabase};
pub use refcount::ObjectReferenceDatabase;
pub use single_flight::TaskSynchronizer;
pub use traits::{ManifestDatabase, ObjectDatabase, ObjectState, ObjectStream, ObjectWalk};
pub use transaction::{Transaction, Transactions};
