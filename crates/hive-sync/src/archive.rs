use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hive_ops::{manifest, Hive, PruneReport};
use hive_pack::{apply_bundle, bundle_from_store, ApplyReport, BundleReader};
use hive_types::{ManifestKey, ObjectId};
use tracing::{debug, info};

use crate::error::SyncResult;
use crate::local::LocalRemote;
use crate::remote::RemoteStore;

/// A remote backed by a single bundle file.
///
/// The archive is loaded into an in-memory store when opened. Queries run
/// against that store; every mutation rewrites the file in full. A path
/// that does not exist yet is an empty archive.
#[derive(Clone, Debug)]
pub struct ArchiveRemote {
    path: PathBuf,
    store: LocalRemote,
    write: Arc<Mutex<()>>,
}

impl ArchiveRemote {
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let hive = Hive::in_memory();
        if path.exists() {
            let bundle = BundleReader::open(&path)?;
            let report = apply_bundle(&hive, &bundle)?;
            debug!(
                path = %path.display(),
                objects = report.objects_written,
                manifests = report.manifests_added.len(),
                "loaded archive"
            );
        }
        let address = format!("jar:{}", path.display());
        Ok(Self {
            store: LocalRemote::new(Arc::new(hive)).with_address(address),
            path,
            write: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `change` against the archive's store, then rewrite the file.
    async fn mutate<T, F>(&self, change: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Hive) -> SyncResult<T> + Send + 'static,
    {
        let (path, write) = (self.path.clone(), Arc::clone(&self.write));
        self.store
            .blocking(move |hive| {
                let _guard = write.lock().expect("lock poisoned");
                let value = change(hive)?;
                persist(hive, &path)?;
                Ok(value)
            })
            .await
    }
}

fn persist(hive: &Hive, path: &Path) -> SyncResult<()> {
    let objects = hive
        .objects()
        .walk_all_objects()?
        .collect::<Result<BTreeSet<_>, _>>()?;
    let keys = hive.manifests().list_manifests("")?;
    let file = bundle_from_store(hive, &objects, &keys)?.finish(path)?;
    info!(
        path = %file.path.display(),
        objects = file.object_count,
        manifests = file.manifest_count,
        "wrote archive"
    );
    Ok(())
}

#[async_trait]
impl RemoteStore for ArchiveRemote {
    fn address(&self) -> &str {
        self.store.address()
    }

    async fn get_missing_objects(
        &self,
        candidates: &BTreeSet<ObjectId>,
    ) -> SyncResult<BTreeSet<ObjectId>> {
        self.store.get_missing_objects(candidates).await
    }

    async fn get_manifest_inventory(
        &self,
        filters: &[String],
    ) -> SyncResult<BTreeMap<ManifestKey, ObjectId>> {
        self.store.get_manifest_inventory(filters).await
    }

    async fn get_required_objects(
        &self,
        roots: &[ObjectId],
        exclude: &[ObjectId],
    ) -> SyncResult<BTreeSet<ObjectId>> {
        self.store.get_required_objects(roots, exclude).await
    }

    async fn get_required_trees(&self, root: ObjectId) -> SyncResult<BTreeSet<ObjectId>> {
        self.store.get_required_trees(root).await
    }

    async fn push(&self, bundle: BundleReader) -> SyncResult<ApplyReport> {
        self.mutate(move |hive| Ok(apply_bundle(hive, &bundle)?)).await
    }

    async fn fetch(
        &self,
        objects: &BTreeSet<ObjectId>,
        keys: &[ManifestKey],
    ) -> SyncResult<Vec<u8>> {
        self.store.fetch(objects, keys).await
    }

    async fn remove_manifest(&self, key: &ManifestKey) -> SyncResult<bool> {
        let key = key.clone();
        self.mutate(move |hive| Ok(manifest::delete(hive, &key)?))
            .await
    }

    async fn prune(&self) -> SyncResult<PruneReport> {
        self.mutate(|hive| Ok(hive_ops::prune(hive)?)).await
    }
}
