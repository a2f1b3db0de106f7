use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use hive_ops::PruneReport;
use hive_pack::{ApplyReport, BundleReader};
use hive_types::{ManifestKey, ObjectId};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SyncResult;

/// Byte stream carrying a bundle.
pub type BundleStream = Box<dyn AsyncRead + Send + Unpin>;

/// A store on the other side of a replication, wherever it lives.
///
/// Every method is remote-invocable: implementations may sit on a local
/// directory, an archive file or a network service.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Address the remote was opened from, for logging.
    fn address(&self) -> &str;

    /// The members of `candidates` the remote does not hold.
    async fn get_missing_objects(
        &self,
        candidates: &BTreeSet<ObjectId>,
    ) -> SyncResult<BTreeSet<ObjectId>>;

    /// Root tree per manifest key, restricted to names starting with one of
    /// `filters` (all manifests if empty).
    async fn get_manifest_inventory(
        &self,
        filters: &[String],
    ) -> SyncResult<BTreeMap<ManifestKey, ObjectId>>;

    /// Objects reachable from `roots` but not from `exclude`.
    async fn get_required_objects(
        &self,
        roots: &[ObjectId],
        exclude: &[ObjectId],
    ) -> SyncResult<BTreeSet<ObjectId>>;

    /// Every tree reachable from `root`.
    async fn get_required_trees(&self, root: ObjectId) -> SyncResult<BTreeSet<ObjectId>>;

    /// Apply a bundle: objects, then the manifests it carries.
    async fn push(&self, bundle: BundleReader) -> SyncResult<ApplyReport>;

    /// [`RemoteStore::push`] for a bundle arriving as a byte stream.
    async fn push_stream(&self, stream: BundleStream) -> SyncResult<ApplyReport> {
        let bundle = read_bundle(stream).await?;
        self.push(bundle).await
    }

    /// A bundle holding exactly `objects` and the manifests named by `keys`.
    async fn fetch(
        &self,
        objects: &BTreeSet<ObjectId>,
        keys: &[ManifestKey],
    ) -> SyncResult<Vec<u8>>;

    /// [`RemoteStore::fetch`] as a byte stream.
    async fn fetch_stream(
        &self,
        objects: &BTreeSet<ObjectId>,
        keys: &[ManifestKey],
    ) -> SyncResult<BundleStream> {
        let bytes = self.fetch(objects, keys).await?;
        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    /// Whether a manifest was removed.
    async fn remove_manifest(&self, key: &ManifestKey) -> SyncResult<bool>;

    async fn prune(&self) -> SyncResult<PruneReport>;
}

/// Drain a stream and validate it as a bundle.
pub async fn read_bundle(mut stream: BundleStream) -> SyncResult<BundleReader> {
    let mut bytes = Vec::new();
    stream.read_to_end(&mut bytes).await?;
    Ok(BundleReader::from_bytes(bytes)?)
}
