use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use hive_types::ObjectId;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};

#[derive(Default, Serialize, Deserialize)]
struct ReferenceFile {
    objects: BTreeMap<ObjectId, BTreeSet<String>>,
}

/// Which store instances ("owners") reference each pooled object.
///
/// Pool reorganization reads the owner count of an object to decide whether
/// it belongs in the shared pool. Persisted as one JSON document replaced
/// atomically on [`ObjectReferenceDatabase::save`].
#[derive(Debug)]
pub struct ObjectReferenceDatabase {
    path: Option<PathBuf>,
    objects: RwLock<BTreeMap<ObjectId, BTreeSet<String>>>,
}

impl ObjectReferenceDatabase {
    /// A table that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    /// Load the table from `path`, or start empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let objects = match fs::read(&path) {
            Ok(data) => {
                let file: ReferenceFile = serde_json::from_slice(&data)
                    .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))?;
                file.objects
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            objects: RwLock::new(objects),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record that `owner` references `id`. Returns the new owner count.
    pub fn add_reference(&self, id: ObjectId, owner: &str) -> usize {
        let mut map = self.objects.write().expect("lock poisoned");
        let owners = map.entry(id).or_default();
        owners.insert(owner.to_string());
        owners.len()
    }

    /// Drop `owner`'s reference to `id`. Returns the remaining owner count.
    pub fn remove_reference(&self, id: &ObjectId, owner: &str) -> usize {
        let mut map = self.objects.write().expect("lock poisoned");
        let Some(owners) = map.get_mut(id) else {
            return 0;
        };
        owners.remove(owner);
        let remaining = owners.len();
        if remaining == 0 {
            map.remove(id);
        }
        remaining
    }

    /// Replace the whole owner set of `id`. An empty set forgets the object.
    pub fn set_owners(&self, id: ObjectId, owners: BTreeSet<String>) {
        let mut map = self.objects.write().expect("lock poisoned");
        if owners.is_empty() {
            map.remove(&id);
        } else {
            map.insert(id, owners);
        }
    }

    pub fn owners(&self, id: &ObjectId) -> BTreeSet<String> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn count(&self, id: &ObjectId) -> usize {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(id)
            .map_or(0, BTreeSet::len)
    }

    /// Every tracked object, sorted.
    pub fn objects(&self) -> Vec<ObjectId> {
        self.objects
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Forget `owner` everywhere, e.g. when a store leaves the pool.
    pub fn remove_owner(&self, owner: &str) {
        let mut map = self.objects.write().expect("lock poisoned");
        map.retain(|_, owners| {
            owners.remove(owner);
            !owners.is_empty()
        });
    }

    /// Persist the table. A no-op for in-memory tables.
    pub fn save(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = ReferenceFile {
            objects: self.objects.read().expect("lock poisoned").clone(),
        };
        let data = serde_json::to_vec_pretty(&file)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(&data)?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
