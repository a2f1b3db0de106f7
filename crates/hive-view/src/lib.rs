//! Tree scanning, traversal, and diffing for the Hive object store.
//!
//! A scan resolves a tree (and every manifest it references) against the
//! object database into a [`TreeView`]: an arena of [`ElementView`]s, each
//! tagged with what it resolved to. Corruption is data here: an absent
//! object is a [`ViewKind::Missing`] element, a hash mismatch is a
//! [`ViewKind::Damaged`] one, sound bytes that do not decode as the entry's
//! type are [`ViewKind::Malformed`], and the scan itself only fails on I/O
//! errors.
//!
//! # Key Types
//!
//! - [`TreeScanner`] -- builds views, with optional depth limit
//! - [`TreeView`] / [`ElementView`] / [`ViewKind`] -- the scanned snapshot
//! - [`TreeVisitor`] -- pre-order ([`TreeView::visit`]) and post-order
//!   ([`TreeView::visit_dfs`]) traversal
//! - [`TreeDiff`] / [`DiffEntry`] -- differences between two views

pub mod diff;
pub mod element;
pub mod error;
pub mod scan;
pub mod visit;

pub use diff::{DiffEntry, DiffKind, TreeDiff};
pub use element::{ElementPath, ElementView, NodeId, TreeView, ViewKind};
pub use error::{ViewError, ViewResult};
pub use scan::TreeScanner;
pub use visit::TreeVisitor;
