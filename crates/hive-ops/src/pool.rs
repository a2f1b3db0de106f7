//! Shared object pools.
//!
//! Stores joined to a pool read its objects through a read-only layer and
//! never duplicate pooled content locally. [`reorganize`] decides what lives
//! in the pool: objects reachable from at least `pool_threshold` member
//! stores move in, pooled objects that fell below the threshold move back
//! to their remaining owners, and pooled objects nobody reaches are dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hive_store::{
    DirectoryLock, FsObjectDatabase, InMemoryObjectDatabase, ObjectDatabase,
    ObjectReferenceDatabase, StoreResult, Transaction, Transactions,
};
use hive_types::ObjectId;
use tracing::{debug, info};

use crate::config::HiveConfig;
use crate::error::{OpsError, OpsResult};
use crate::hive::{Hive, OBJECTS_DIR, STAGING_DIR};
use crate::required::{manifest_inventory, required_objects};

/// Owner table inside a pool directory.
pub const REFERENCES_FILE: &str = "references.json";

/// A store of objects shared by several [`Hive`]s, with the table of which
/// store references what.
pub struct ObjectPool {
    root: Option<PathBuf>,
    config: HiveConfig,
    objects: Arc<dyn ObjectDatabase>,
    references: ObjectReferenceDatabase,
    txns: Transactions,
}

impl ObjectPool {
    /// Open the pool directory at `root`, creating it if needed.
    pub fn open(root: impl AsRef<Path>) -> OpsResult<Self> {
        let root = root.as_ref();
        let config = HiveConfig::load(root)?;
        let objects = FsObjectDatabase::open(root.join(OBJECTS_DIR), root.join(STAGING_DIR))?
            .with_fsync(config.fsync);
        let references = ObjectReferenceDatabase::open(root.join(REFERENCES_FILE))?;
        let lock = DirectoryLock::new(root, config.lock_owner.clone());
        Ok(Self {
            root: Some(root.to_path_buf()),
            txns: Transactions::with_lock(lock, config.lock_timeout()),
            config,
            objects: Arc::new(objects),
            references,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            root: None,
            config: HiveConfig::default(),
            objects: Arc::new(InMemoryObjectDatabase::new()),
            references: ObjectReferenceDatabase::in_memory(),
            txns: Transactions::new(),
        }
    }

    /// Override the owner count at which objects move into the pool.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.config.pool_threshold = threshold;
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn threshold(&self) -> usize {
        self.config.pool_threshold.max(1)
    }

    pub fn objects(&self) -> &Arc<dyn ObjectDatabase> {
        &self.objects
    }

    pub fn references(&self) -> &ObjectReferenceDatabase {
        &self.references
    }

    pub fn begin(&self) -> OpsResult<Transaction<'_>> {
        Ok(self.txns.begin()?)
    }
}

impl std::fmt::Debug for ObjectPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("root", &self.root)
            .field("threshold", &self.threshold())
            .finish()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReorganizeReport {
    /// Objects moved into the pool.
    pub pooled: Vec<ObjectId>,
    /// Objects moved from the pool back to their owners.
    pub returned: Vec<ObjectId>,
    /// Pooled objects no member references any more.
    pub dropped: Vec<ObjectId>,
}

/// Recompute which objects `members` reference and move objects across the
/// pool boundary accordingly.
///
/// Every member and the pool are locked for the whole run, members in name
/// order. Every member must be joined to `pool`. Ownership recorded for stores outside `members` is preserved, and
/// a pooled object one of them still owns never leaves the pool.
pub fn reorganize(pool: &ObjectPool, members: &[&Hive]) -> OpsResult<ReorganizeReport> {
    let mut members = members.to_vec();
    members.sort_by(|a, b| a.name().cmp(b.name()));
    members.dedup_by(|a, b| a.name() == b.name());
    if let Some(outsider) = members.iter().find(|hive| !hive.is_joined_to(pool)) {
        return Err(OpsError::NotInPool(outsider.name().to_string()));
    }

    let _pool_tx = pool.begin()?;
    let _member_txs = members
        .iter()
        .map(|hive| hive.begin())
        .collect::<OpsResult<Vec<_>>>()?;

    let participating: BTreeSet<String> = members.iter().map(|h| h.name().to_string()).collect();
    let mut owners: BTreeMap<ObjectId, BTreeSet<String>> = BTreeMap::new();
    for id in pool.references().objects() {
        let outside: BTreeSet<String> = pool
            .references()
            .owners(&id)
            .difference(&participating)
            .cloned()
            .collect();
        owners.insert(id, outside);
    }
    for hive in &members {
        for id in reachable_stored(pool, hive)? {
            owners.entry(id).or_default().insert(hive.name().to_string());
        }
    }
    for (id, set) in &owners {
        pool.references().set_owners(*id, set.clone());
    }

    let threshold = pool.threshold();
    let mut report = ReorganizeReport::default();

    for (id, set) in &owners {
        if set.len() < threshold {
            continue;
        }
        let mut holders = Vec::new();
        for hive in &members {
            if hive.local_objects().has_object(id)? {
                holders.push(*hive);
            }
        }
        if !pool.objects().has_object(id)? {
            let Some(source) = holders.first() else {
                continue;
            };
            let data = read(source.local_objects(), id)?;
            pool.objects().add_object(&data)?;
            report.pooled.push(*id);
            debug!(id = %id.short_hex(), owners = set.len(), "pooled object");
        }
        for hive in holders {
            hive.local_objects().remove_object(id)?;
        }
    }

    let pooled: Vec<ObjectId> = pool.objects().walk_all_objects()?.collect::<StoreResult<_>>()?;
    for id in pooled {
        let set = owners.get(&id).cloned().unwrap_or_default();
        if set.is_empty() {
            pool.objects().remove_object(&id)?;
            report.dropped.push(id);
            continue;
        }
        if set.len() >= threshold || !set.is_subset(&participating) {
            continue;
        }
        let data = read(pool.objects().as_ref(), &id)?;
        for hive in members.iter().filter(|h| set.contains(h.name())) {
            hive.local_objects().add_object(&data)?;
        }
        pool.objects().remove_object(&id)?;
        report.returned.push(id);
        debug!(id = %id.short_hex(), "returned object to owners");
    }

    pool.references().save()?;
    let summary = format!(
        "{} pooled, {} returned, {} dropped",
        report.pooled.len(),
        report.returned.len(),
        report.dropped.len()
    );
    for hive in &members {
        hive.audit("pool-reorganize", summary.clone())?;
    }
    info!(
        pooled = report.pooled.len(),
        returned = report.returned.len(),
        dropped = report.dropped.len(),
        "pool reorganized"
    );
    Ok(report)
}

/// Objects reachable from `hive`'s manifests that exist locally or in the
/// pool.
fn reachable_stored(pool: &ObjectPool, hive: &Hive) -> OpsResult<BTreeSet<ObjectId>> {
    let roots: Vec<ObjectId> = manifest_inventory(hive, &[])?.into_values().collect();
    let mut stored = BTreeSet::new();
    for id in required_objects(hive, &roots, &[])? {
        if hive.local_objects().has_object(&id)? || pool.objects().has_object(&id)? {
            stored.insert(id);
        }
    }
    Ok(stored)
}

fn read(db: &dyn ObjectDatabase, id: &ObjectId) -> OpsResult<Vec<u8>> {
    let data = db.read_object(id)?.ok_or(OpsError::ObjectNotFound(*id))?;
    if ObjectId::from_bytes(&data) != *id {
        return Err(OpsError::Incomplete {
            context: format!("object {id} does not hash-verify"),
            count: 1,
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Labels;

    fn local_ids(hive: &Hive) -> BTreeSet<ObjectId> {
        hive.local_objects()
            .walk_all_objects()
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn pooled_store_does_not_duplicate_pool_content() {
        let pool = ObjectPool::in_memory();
        let shared = pool.objects().add_object(b"shared").unwrap();
        let hive = Hive::in_memory_pooled(&pool);

        assert_eq!(hive.objects().add_object(b"shared").unwrap(), shared);
        assert!(hive.objects().has_object(&shared).unwrap());
        assert!(local_ids(&hive).is_empty());

        let own = hive.objects().add_object(b"own").unwrap();
        assert_eq!(local_ids(&hive), BTreeSet::from([own]));
        assert!(!pool.objects().has_object(&own).unwrap());
    }

    #[test]
    fn shared_content_moves_in_and_back_out() {
        let pool = ObjectPool::in_memory().with_threshold(2);
        let (a, b) = (Hive::in_memory_pooled(&pool), Hive::in_memory_pooled(&pool));
        let key_a = crate::import::import_bytes(&a, "app:1".parse().unwrap(), "f", b"common", Labels::new())
            .unwrap();
        let key_b = crate::import::import_bytes(&b, "app:1".parse().unwrap(), "f", b"common", Labels::new())
            .unwrap();
        crate::import::import_bytes(&a, "own:1".parse().unwrap(), "g", b"mine", Labels::new())
            .unwrap();

        let report = reorganize(&pool, &[&a, &b]).unwrap();
        // The blob and the identical root tree.
        assert_eq!(report.pooled.len(), 2);
        assert!(local_ids(&b).is_empty());
        assert_eq!(local_ids(&a).len(), 2);
        for id in &report.pooled {
            assert_eq!(pool.references().count(id), 2);
        }
        assert!(crate::check::fsck(&a, &[key_a], true).unwrap().is_clean());

        crate::manifest::delete(&b, &key_b).unwrap();
        let report = reorganize(&pool, &[&a, &b]).unwrap();
        assert_eq!(report.returned.len(), 2);
        assert!(report.pooled.is_empty());
        assert_eq!(local_ids(&a).len(), 4);
        assert!(pool.objects().walk_all_objects().unwrap().next().is_none());
        assert!(crate::check::fsck(&a, &[], true).unwrap().is_clean());
    }

    #[test]
    fn members_outside_the_pool_are_rejected() {
        let pool = ObjectPool::in_memory().with_threshold(2);
        let other = ObjectPool::in_memory();
        let joined = Hive::in_memory_pooled(&pool);
        let (plain, elsewhere) = (Hive::in_memory(), Hive::in_memory_pooled(&other));
        for hive in [&joined, &plain, &elsewhere] {
            crate::import::import_bytes(hive, "app:1".parse().unwrap(), "f", b"same", Labels::new())
                .unwrap();
        }
        assert!(joined.is_joined_to(&pool));
        assert!(!plain.is_joined_to(&pool));

        for outsider in [&plain, &elsewhere] {
            let err = reorganize(&pool, &[&joined, outsider]).unwrap_err();
            assert!(matches!(err, OpsError::NotInPool(name) if name == outsider.name()));
            assert_eq!(local_ids(outsider).len(), 2);
            assert!(crate::check::fsck(outsider, &[], true).unwrap().is_clean());
        }
        assert_eq!(local_ids(&joined).len(), 2);
        assert!(pool.objects().walk_all_objects().unwrap().next().is_none());
        assert!(pool.references().objects().is_empty());
    }

    #[test]
    fn unreferenced_pool_objects_are_dropped() {
        let pool = ObjectPool::in_memory();
        let stray = pool.objects().add_object(b"stray").unwrap();
        let hive = Hive::in_memory_pooled(&pool);
        let report = reorganize(&pool, &[&hive]).unwrap();
        assert_eq!(report.dropped, vec![stray]);
    }

    #[test]
    fn outside_owners_keep_objects_pooled() {
        let pool = ObjectPool::in_memory().with_threshold(2);
        let kept = pool.objects().add_object(b"kept").unwrap();
        pool.references().add_reference(kept, "elsewhere");
        let hive = Hive::in_memory_pooled(&pool);
        crate::import::import_bytes(&hive, "app:1".parse().unwrap(), "f", b"kept", Labels::new())
            .unwrap();

        let report = reorganize(&pool, &[&hive]).unwrap();
        assert!(report.returned.is_empty());
        assert!(pool.objects().has_object(&kept).unwrap());
        assert_eq!(
            pool.references().owners(&kept),
            BTreeSet::from(["elsewhere".to_string(), hive.name().to_string()])
        );
    }

    #[test]
    fn references_persist_in_pool_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = ObjectPool::open(tmp.path().join("pool")).unwrap();
        let a = Hive::open_pooled(tmp.path().join("a"), &pool).unwrap();
        let b = Hive::open_pooled(tmp.path().join("b"), &pool).unwrap();
        for hive in [&a, &b] {
            crate::import::import_bytes(hive, "app:1".parse().unwrap(), "f", b"same", Labels::new())
                .unwrap();
        }
        reorganize(&pool, &[&a, &b]).unwrap();
        drop(pool);

        let reopened = ObjectPool::open(tmp.path().join("pool")).unwrap();
        assert_eq!(reopened.references().objects().len(), 2);
        assert!(tmp.path().join("pool").join(REFERENCES_FILE).is_file());
    }
}
