//! The store context every operation runs against.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hive_model::{CodecTable, Tree};
use hive_store::{
    AugmentedObjectDatabase, AuditLog, DirectoryLock, FsManifestDatabase, FsObjectDatabase,
    InMemoryManifestDatabase, InMemoryObjectDatabase, ManifestDatabase, ObjectDatabase,
    ReadOnlyObjectDatabase, Transaction, Transactions,
};
use hive_types::ObjectId;
use hive_view::TreeScanner;
use tracing::{debug, info};

use crate::config::HiveConfig;
use crate::error::{OpsError, OpsResult};
use crate::pool::ObjectPool;

/// Content-addressed object files.
pub const OBJECTS_DIR: &str = "objects";
/// Manifest records.
pub const MANIFESTS_DIR: &str = "manifests";
/// Staging area for writes in progress.
pub const STAGING_DIR: &str = "tmp";
/// Audit log directory.
pub const LOGS_DIR: &str = "logs";

/// One store instance: its object and manifest databases, codecs, write
/// scopes and audit trail.
///
/// On disk a store is a directory:
///
/// ```text
/// <root>/
///   hive.toml        optional configuration
///   .lock            directory lock held by write scopes
///   objects/ab/ab..  one file per object, fanned out by hash prefix
///   manifests/..     one file per manifest key
///   tmp/             staged writes
///   logs/audit.log   one JSON line per mutating operation
/// ```
pub struct Hive {
    name: String,
    root: Option<PathBuf>,
    config: HiveConfig,
    local: Arc<dyn ObjectDatabase>,
    objects: Arc<dyn ObjectDatabase>,
    pool: Option<Arc<dyn ObjectDatabase>>,
    manifests: Arc<dyn ManifestDatabase>,
    codecs: CodecTable,
    txns: Transactions,
    lock: Option<DirectoryLock>,
    audit: Option<AuditLog>,
}

impl Hive {
    /// Open the store at `root`, creating its layout if needed.
    pub fn open(root: impl AsRef<Path>) -> OpsResult<Self> {
        let config = HiveConfig::load(root.as_ref())?;
        Self::open_with_config(root, config)
    }

    pub fn open_with_config(root: impl AsRef<Path>, config: HiveConfig) -> OpsResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root)?;
        let staging = root.join(STAGING_DIR);
        let objects = FsObjectDatabase::open(root.join(OBJECTS_DIR), &staging)?
            .with_fsync(config.fsync);
        let manifests =
            FsManifestDatabase::open(root.join(MANIFESTS_DIR), &staging)?.with_fsync(config.fsync);
        let lock = DirectoryLock::new(root, config.lock_owner.clone());
        let txns = Transactions::with_lock(lock.clone(), config.lock_timeout());
        let audit = AuditLog::open(root.join(LOGS_DIR), config.audit_user.clone())?;
        let local: Arc<dyn ObjectDatabase> = Arc::new(objects);

        info!(root = %root.display(), "opened store");
        Ok(Self {
            name: root.display().to_string(),
            root: Some(root.to_path_buf()),
            config,
            objects: Arc::clone(&local),
            local,
            pool: None,
            manifests: Arc::new(manifests),
            codecs: CodecTable::standard(),
            txns,
            lock: Some(lock),
            audit: Some(audit),
        })
    }

    /// A store with no backing directory, named with a fresh UUID. It has
    /// no directory lock and keeps no audit log.
    pub fn in_memory() -> Self {
        Self::from_parts(
            format!("memory:{}", uuid::Uuid::now_v7()),
            Arc::new(InMemoryObjectDatabase::new()),
            Arc::new(InMemoryManifestDatabase::new()),
        )
    }

    /// A store over caller-supplied databases, without directory lock or
    /// audit log.
    pub fn from_parts(
        name: impl Into<String>,
        objects: Arc<dyn ObjectDatabase>,
        manifests: Arc<dyn ManifestDatabase>,
    ) -> Self {
        Self {
            name: name.into(),
            root: None,
            config: HiveConfig::default(),
            objects: Arc::clone(&objects),
            local: objects,
            pool: None,
            manifests,
            codecs: CodecTable::standard(),
            txns: Transactions::new(),
            lock: None,
            audit: None,
        }
    }

    /// Open the store at `root` with `pool` as shared read-only backing.
    pub fn open_pooled(root: impl AsRef<Path>, pool: &ObjectPool) -> OpsResult<Self> {
        Ok(Self::open(root)?.join_pool(pool))
    }

    pub fn in_memory_pooled(pool: &ObjectPool) -> Self {
        Self::in_memory().join_pool(pool)
    }

    fn join_pool(mut self, pool: &ObjectPool) -> Self {
        self.pool = Some(Arc::clone(pool.objects()));
        let shared: Arc<dyn ObjectDatabase> =
            Arc::new(ReadOnlyObjectDatabase::new(Arc::clone(pool.objects())));
        self.objects = Arc::new(AugmentedObjectDatabase::new(
            Arc::clone(&self.local),
            vec![shared],
        ));
        debug!(store = %self.name, "joined object pool");
        self
    }

    /// Identity of this store, used as its owner name in a pool.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn config(&self) -> &HiveConfig {
        &self.config
    }

    /// Whether this store reads through `pool`.
    pub fn is_joined_to(&self, pool: &ObjectPool) -> bool {
        self.pool
            .as_ref()
            .is_some_and(|shared| Arc::ptr_eq(shared, pool.objects()))
    }

    /// The object database operations read and write, pool included.
    pub fn objects(&self) -> &dyn ObjectDatabase {
        self.objects.as_ref()
    }

    /// Objects stored by this instance itself, excluding any pool.
    pub fn local_objects(&self) -> &dyn ObjectDatabase {
        self.local.as_ref()
    }

    pub fn manifests(&self) -> &dyn ManifestDatabase {
        self.manifests.as_ref()
    }

    pub fn codecs(&self) -> &CodecTable {
        &self.codecs
    }

    pub fn transactions(&self) -> &Transactions {
        &self.txns
    }

    /// The directory lock write scopes hold, absent for in-memory stores.
    pub fn directory_lock(&self) -> Option<&DirectoryLock> {
        self.lock.as_ref()
    }

    pub fn audit_log(&self) -> Option<&AuditLog> {
        self.audit.as_ref()
    }

    /// Enter a write scope.
    pub fn begin(&self) -> OpsResult<Transaction<'_>> {
        Ok(self.txns.begin()?)
    }

    /// Record a mutating operation in the audit log, if the store keeps one.
    pub fn audit(&self, operation: &str, detail: impl Into<String>) -> OpsResult<()> {
        if let Some(log) = &self.audit {
            log.record(operation, detail)?;
        }
        Ok(())
    }

    /// A scanner over this store's objects and manifests.
    pub fn scanner(&self) -> TreeScanner<'_> {
        TreeScanner::new(self.objects(), self.manifests(), &self.codecs)
    }

    /// Encode and store a tree.
    pub fn add_tree(&self, tree: &Tree) -> OpsResult<ObjectId> {
        let bytes = self.codecs.to_bytes(tree)?;
        Ok(self.objects.add_object(&bytes)?)
    }

    /// Read and decode a stored tree.
    pub fn load_tree(&self, id: &ObjectId) -> OpsResult<Tree> {
        let bytes = self
            .objects
            .read_object(id)?
            .ok_or(OpsError::ObjectNotFound(*id))?;
        Ok(self.codecs.from_bytes(&bytes)?)
    }
}

impl fmt::Debug for Hive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hive")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("pooled", &self.pool.is_some())
            .field("txns", &self.txns)
            .finish()
    }
}
