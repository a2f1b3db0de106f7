//! Replication for the Hive object store.
//!
//! A [`RemoteStore`] is the other side of a replication, reached through a
//! [`TransportRegistry`] from an address such as `file:///srv/hive` or
//! `jar:/backups/hive.hivb`. [`push`] and [`fetch`] negotiate by hash so
//! that content the receiving side already holds is never sent again.
//! Everything on the wire is a bundle from `hive-pack`.

pub mod archive;
pub mod error;
pub mod local;
pub mod negotiation;
pub mod remote;
pub mod transport;
pub mod types;

pub use archive::ArchiveRemote;
pub use error::{SyncError, SyncResult};
pub use local::LocalRemote;
pub use negotiation::{fetch, push};
pub use remote::{read_bundle, BundleStream, RemoteStore};
pub use transport::{RemoteAddress, RemoteConnector, TransportRegistry, ARCHIVE_SCHEME, FILE_SCHEME};
pub use types::{FetchReport, PushReport};
