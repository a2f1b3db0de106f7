use std::io::{self, Read};
use std::time::SystemTime;

use hive_model::Manifest;
use hive_types::{ManifestKey, ObjectId};

use crate::error::{StoreError, StoreResult};

/// Lazy sequence of object ids produced by [`ObjectDatabase::walk_all_objects`].
pub type ObjectWalk<'a> = Box<dyn Iterator<Item = StoreResult<ObjectId>> + Send + 'a>;

/// Byte stream of a stored object.
pub type ObjectStream = Box<dyn Read + Send>;

/// Result of hash-verifying a single object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectState {
    /// Present and its bytes hash to its id.
    Intact,
    /// Not in storage.
    Missing,
    /// Present but its bytes do not hash to its id.
    Damaged(String),
}

/// Content-addressed object database.
///
/// All implementations must satisfy these invariants:
/// - An object's id is the hash of its bytes; adding the same bytes twice
///   yields the same id and stores them once.
/// - A crash mid-write never leaves a partial object visible under its id.
/// - Objects are never modified in place, so reads need no locking.
/// - Absence is `Ok(None)` / `Ok(false)`; `Err` is reserved for I/O failure.
pub trait ObjectDatabase: Send + Sync {
    /// Store bytes and return their id. Idempotent.
    fn add_object(&self, data: &[u8]) -> StoreResult<ObjectId>;

    /// Store the content of a reader.
    ///
    /// The default buffers the stream; backends override to stream to disk.
    fn add_stream(&self, reader: &mut dyn Read) -> StoreResult<ObjectId> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.add_object(&data)
    }

    fn has_object(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Open an object for reading. Fails with [`StoreError::NotFound`] if absent.
    fn get_stream(&self, id: &ObjectId) -> StoreResult<ObjectStream>;

    /// Read a whole object. Returns `Ok(None)` if absent.
    fn read_object(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>> {
        match self.get_stream(id) {
            Ok(mut stream) => {
                let mut data = Vec::new();
                stream.read_to_end(&mut data)?;
                Ok(Some(data))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete an object. Returns `true` if it existed.
    ///
    /// Deleting a referenced object corrupts the store; callers are prune,
    /// fsck, and pool reorganization.
    fn remove_object(&self, id: &ObjectId) -> StoreResult<bool>;

    /// Every object id this database stores. Calling it again restarts the
    /// walk.
    fn walk_all_objects(&self) -> StoreResult<ObjectWalk<'_>>;

    /// Stored size in bytes.
    fn object_size(&self, id: &ObjectId) -> StoreResult<Option<u64>>;

    /// When the object was last written (or re-added).
    fn object_timestamp(&self, id: &ObjectId) -> StoreResult<Option<SystemTime>>;

    /// Re-hash an object and classify it.
    ///
    /// A hash mismatch is data, not an error. I/O failures still propagate
    /// so an unreachable store is never mistaken for a damaged one.
    fn verify_object(&self, id: &ObjectId) -> StoreResult<ObjectState> {
        let mut stream = match self.get_stream(id) {
            Ok(stream) => stream,
            Err(StoreError::NotFound(_)) => return Ok(ObjectState::Missing),
            Err(e) => return Err(e),
        };
        let actual = ObjectId::from_reader(&mut stream)?;
        Ok(if actual == *id {
            ObjectState::Intact
        } else {
            ObjectState::Damaged(format!("content hashes to {actual}"))
        })
    }

    /// `false` for read-only variants.
    fn is_writable(&self) -> bool {
        true
    }
}

/// Storage for manifest records, indexed by key.
pub trait ManifestDatabase: Send + Sync {
    /// Insert a manifest. Fails with [`StoreError::ManifestExists`] if the key
    /// is taken; manifests are never overwritten.
    fn add_manifest(&self, manifest: &Manifest) -> StoreResult<()>;

    /// Returns `Ok(None)` if no manifest has this key.
    fn get_manifest(&self, key: &ManifestKey) -> StoreResult<Option<Manifest>>;

    fn has_manifest(&self, key: &ManifestKey) -> StoreResult<bool> {
        Ok(self.get_manifest(key)?.is_some())
    }

    /// Returns `true` if the manifest existed.
    fn remove_manifest(&self, key: &ManifestKey) -> StoreResult<bool>;

    /// Keys whose name starts with `name_prefix`, sorted. `""` lists all.
    fn list_manifests(&self, name_prefix: &str) -> StoreResult<Vec<ManifestKey>>;
}

pub(crate) fn not_found(id: &ObjectId) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |e| {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::NotFound(*id)
        } else {
            StoreError::Io(e)
        }
    }
}
