use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use hive_ops::{manifest, Hive, PruneReport};
use hive_pack::{apply_bundle, bundle_from_store, ApplyReport, BundleReader};
use hive_types::{ManifestKey, ObjectId};

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;

/// A remote that is another store on this machine.
///
/// Store operations block on file I/O, so each call runs on tokio's
/// blocking pool.
#[derive(Clone, Debug)]
pub struct LocalRemote {
    address: String,
    hive: Arc<Hive>,
}

impl LocalRemote {
    pub fn new(hive: Arc<Hive>) -> Self {
        Self {
            address: hive.name().to_string(),
            hive,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn hive(&self) -> &Arc<Hive> {
        &self.hive
    }

    pub(crate) async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Hive) -> SyncResult<T> + Send + 'static,
    {
        let hive = Arc::clone(&self.hive);
        tokio::task::spawn_blocking(move || f(&hive))
            .await
            .map_err(|e| SyncError::Remote(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl RemoteStore for LocalRemote {
    fn address(&self) -> &str {
        &self.address
    }

    async fn get_missing_objects(
        &self,
        candidates: &BTreeSet<ObjectId>,
    ) -> SyncResult<BTreeSet<ObjectId>> {
        let candidates = candidates.clone();
        self.blocking(move |hive| Ok(hive_ops::missing_objects(hive, &candidates)?))
            .await
    }

    async fn get_manifest_inventory(
        &self,
        filters: &[String],
    ) -> SyncResult<BTreeMap<ManifestKey, ObjectId>> {
        let filters = filters.to_vec();
        self.blocking(move |hive| Ok(hive_ops::manifest_inventory(hive, &filters)?))
            .await
    }

    async fn get_required_objects(
        &self,
        roots: &[ObjectId],
        exclude: &[ObjectId],
    ) -> SyncResult<BTreeSet<ObjectId>> {
        let (roots, exclude) = (roots.to_vec(), exclude.to_vec());
        self.blocking(move |hive| Ok(hive_ops::required_objects(hive, &roots, &exclude)?))
            .await
    }

    async fn get_required_trees(&self, root: ObjectId) -> SyncResult<BTreeSet<ObjectId>> {
        self.blocking(move |hive| Ok(hive_ops::required_trees(hive, root)?))
            .await
    }

    async fn push(&self, bundle: BundleReader) -> SyncResult<ApplyReport> {
        self.blocking(move |hive| Ok(apply_bundle(hive, &bundle)?))
            .await
    }

    async fn fetch(
        &self,
        objects: &BTreeSet<ObjectId>,
        keys: &[ManifestKey],
    ) -> SyncResult<Vec<u8>> {
        let (objects, keys) = (objects.clone(), keys.to_vec());
        self.blocking(move |hive| {
            let writer = bundle_from_store(hive, &objects, &keys)?;
            Ok(writer.finish_to_bytes()?)
        })
        .await
    }

    async fn remove_manifest(&self, key: &ManifestKey) -> SyncResult<bool> {
        let key = key.clone();
        self.blocking(move |hive| Ok(manifest::delete(hive, &key)?))
            .await
    }

    async fn prune(&self) -> SyncResult<PruneReport> {
        self.blocking(|hive| Ok(hive_ops::prune(hive)?)).await
    }
}
