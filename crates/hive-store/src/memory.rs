use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use hive_model::Manifest;
use hive_types::{ManifestKey, ObjectId};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ManifestDatabase, ObjectDatabase, ObjectStream, ObjectWalk};

struct MemoryObject {
    data: Arc<[u8]>,
    written: SystemTime,
}

/// In-memory, HashMap-based object database.
///
/// Intended for tests and embedding. Objects live behind a `RwLock`; reads
/// share the stored buffer.
pub struct InMemoryObjectDatabase {
    objects: RwLock<HashMap<ObjectId, MemoryObject>>,
}

impl InMemoryObjectDatabase {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored objects.
    pub fn total_bytes(&self) -> u64 {
        self.objects
            .read()
            .expect("lock poisoned")
            .values()
            .map(|obj| obj.data.len() as u64)
            .sum()
    }

    /// Store bytes under an arbitrary id, bypassing hashing.
    ///
    /// Only useful for simulating corruption in tests of the checkers.
    #[doc(hidden)]
    pub fn insert_unchecked(&self, id: ObjectId, data: Vec<u8>) {
        self.objects.write().expect("lock poisoned").insert(
            id,
            MemoryObject {
                data: data.into(),
                written: SystemTime::now(),
            },
        );
    }
}

impl Default for InMemoryObjectDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectDatabase for InMemoryObjectDatabase {
    fn add_object(&self, data: &[u8]) -> StoreResult<ObjectId> {
        let id = ObjectId::from_bytes(data);
        let mut map = self.objects.write().expect("lock poisoned");
        match map.get_mut(&id) {
            Some(existing) => existing.written = SystemTime::now(),
            None => {
                debug!(id = %id.short_hex(), size = data.len(), "stored object");
                map.insert(
                    id,
                    MemoryObject {
                        data: data.into(),
                        written: SystemTime::now(),
                    },
                );
            }
        }
        Ok(id)
    }

    fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.objects.read().expect("lock poisoned").contains_key(id))
    }

    fn get_stream(&self, id: &ObjectId) -> StoreResult<ObjectStream> {
        let map = self.objects.read().expect("lock poisoned");
        let obj = map.get(id).ok_or(StoreError::NotFound(*id))?;
        Ok(Box::new(Cursor::new(obj.data.clone())))
    }

    fn read_object(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).map(|obj| obj.data.to_vec()))
    }

    fn remove_object(&self, id: &ObjectId) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(id).is_some())
    }

    fn walk_all_objects(&self) -> StoreResult<ObjectWalk<'_>> {
        let mut ids: Vec<ObjectId> = self
            .objects
            .read()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort();
        Ok(Box::new(ids.into_iter().map(Ok)))
    }

    fn object_size(&self, id: &ObjectId) -> StoreResult<Option<u64>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).map(|obj| obj.data.len() as u64))
    }

    fn object_timestamp(&self, id: &ObjectId) -> StoreResult<Option<SystemTime>> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(id).map(|obj| obj.written))
    }
}

impl std::fmt::Debug for InMemoryObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectDatabase")
            .field("object_count", &self.len())
            .finish()
    }
}

/// In-memory manifest database backed by a sorted map.
#[derive(Debug, Default)]
pub struct InMemoryManifestDatabase {
    manifests: RwLock<BTreeMap<ManifestKey, Manifest>>,
}

impl InMemoryManifestDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ManifestDatabase for InMemoryManifestDatabase {
    fn add_manifest(&self, manifest: &Manifest) -> StoreResult<()> {
        let mut map = self.manifests.write().expect("lock poisoned");
        if map.contains_key(manifest.key()) {
            return Err(StoreError::ManifestExists(manifest.key().clone()));
        }
        map.insert(manifest.key().clone(), manifest.clone());
        Ok(())
    }

    fn get_manifest(&self, key: &ManifestKey) -> StoreResult<Option<Manifest>> {
        Ok(self.manifests.read().expect("lock poisoned").get(key).cloned())
    }

    fn remove_manifest(&self, key: &ManifestKey) -> StoreResult<bool> {
        Ok(self
            .manifests
            .write()
            .expect("lock poisoned")
            .remove(key)
            .is_some())
    }

    fn list_manifests(&self, name_prefix: &str) -> StoreResult<Vec<ManifestKey>> {
        let map = self.manifests.read().expect("lock poisoned");
        Ok(map
            .keys()
            .filter(|key| key.name().starts_with(name_prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ObjectState;
    use std::io::Read;

    fn manifest(key: &str, root: ObjectId) -> Manifest {
        Manifest::builder(key.parse().unwrap())
            .root(root)
            .build()
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    #[test]
    fn add_is_idempotent() {
        let db = InMemoryObjectDatabase::new();
        let a = db.add_object(b"hello").unwrap();
        let b = db.add_object(b"hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(db.len(), 1);
        assert_eq!(db.total_bytes(), 5);
    }

    #[test]
    fn stream_reads_back_content() {
        let db = InMemoryObjectDatabase::new();
        let id = db.add_object(b"payload").unwrap();
        let mut out = String::new();
        db.get_stream(&id).unwrap().read_to_string(&mut out).unwrap();
        assert_eq!(out, "payload");
    }

    #[test]
    fn missing_object_is_not_found() {
        let db = InMemoryObjectDatabase::new();
        let id = ObjectId::from_bytes(b"nope");
        assert!(matches!(db.get_stream(&id), Err(StoreError::NotFound(x)) if x == id));
        assert_eq!(db.read_object(&id).unwrap(), None);
        assert!(!db.has_object(&id).unwrap());
    }

    #[test]
    fn remove_reports_existence() {
        let db = InMemoryObjectDatabase::new();
        let id = db.add_object(b"x").unwrap();
        assert!(db.remove_object(&id).unwrap());
        assert!(!db.remove_object(&id).unwrap());
    }

    #[test]
    fn walk_is_restartable() {
        let db = InMemoryObjectDatabase::new();
        db.add_object(b"a").unwrap();
        db.add_object(b"b").unwrap();
        let first: Vec<_> = db.walk_all_objects().unwrap().collect::<Result<_, _>>().unwrap();
        let second: Vec<_> = db.walk_all_objects().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn verify_classifies_objects() {
        let db = InMemoryObjectDatabase::new();
        let good = db.add_object(b"good").unwrap();
        let bad = ObjectId::from_bytes(b"original");
        db.insert_unchecked(bad, b"tampered".to_vec());
        assert_eq!(db.verify_object(&good).unwrap(), ObjectState::Intact);
        assert!(matches!(db.verify_object(&bad).unwrap(), ObjectState::Damaged(_)));
        assert_eq!(
            db.verify_object(&ObjectId::from_bytes(b"absent")).unwrap(),
            ObjectState::Missing
        );
    }

    #[test]
    fn readding_refreshes_timestamp() {
        let db = InMemoryObjectDatabase::new();
        let id = db.add_object(b"x").unwrap();
        let first = db.object_timestamp(&id).unwrap().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.add_object(b"x").unwrap();
        let second = db.object_timestamp(&id).unwrap().unwrap();
        assert!(second > first);
    }

    // -----------------------------------------------------------------------
    // Manifests
    // -----------------------------------------------------------------------

    #[test]
    fn manifests_are_immutable() {
        let db = InMemoryManifestDatabase::new();
        let root = ObjectId::from_bytes(b"root");
        db.add_manifest(&manifest("app:1", root)).unwrap();
        let err = db.add_manifest(&manifest("app:1", root)).unwrap_err();
        assert!(matches!(err, StoreError::ManifestExists(_)));
    }

    #[test]
    fn list_filters_by_name_prefix() {
        let db = InMemoryManifestDatabase::new();
        let root = ObjectId::from_bytes(b"root");
        for key in ["app:2", "app:1", "apple:1", "lib:1"] {
            db.add_manifest(&manifest(key, root)).unwrap();
        }
        let keys: Vec<String> = db
            .list_manifests("app")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys, vec!["app:1", "app:2", "apple:1"]);
        assert_eq!(db.list_manifests("").unwrap().len(), 4);
    }

    #[test]
    fn remove_and_has() {
        let db = InMemoryManifestDatabase::new();
        let m = manifest("app:1", ObjectId::from_bytes(b"root"));
        db.add_manifest(&m).unwrap();
        assert!(db.has_manifest(m.key()).unwrap());
        assert!(db.remove_manifest(m.key()).unwrap());
        assert!(!db.has_manifest(m.key()).unwrap());
        assert!(!db.remove_manifest(m.key()).unwrap());
    }
}
