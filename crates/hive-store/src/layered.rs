//! Read-only and augmented (pooled) object database wrappers.

use std::io::Read;
use std::sync::Arc;
use std::time::SystemTime;

use hive_types::ObjectId;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ObjectDatabase, ObjectState, ObjectStream, ObjectWalk};

/// Exposes the read side of another database; every mutator fails with
/// [`StoreError::Unsupported`].
#[derive(Clone)]
pub struct ReadOnlyObjectDatabase {
    inner: Arc<dyn ObjectDatabase>,
}

impl ReadOnlyObjectDatabase {
    pub fn new(inner: Arc<dyn ObjectDatabase>) -> Self {
        Self { inner }
    }

    fn unsupported<T>(op: &str) -> StoreResult<T> {
        Err(StoreError::Unsupported(format!(
            "{op} on a read-only object database"
        )))
    }
}

impl ObjectDatabase for ReadOnlyObjectDatabase {
    fn add_object(&self, _data: &[u8]) -> StoreResult<ObjectId> {
        Self::unsupported("add_object")
    }

    fn add_stream(&self, _reader: &mut dyn Read) -> StoreResult<ObjectId> {
        Self::unsupported("add_stream")
    }

    fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        self.inner.has_object(id)
    }

    fn get_stream(&self, id: &ObjectId) -> StoreResult<ObjectStream> {
        self.inner.get_stream(id)
    }

    fn read_object(&self, id: &ObjectId) -> StoreResult<Option<Vec<u8>>> {
        self.inner.read_object(id)
    }

    fn remove_object(&self, _id: &ObjectId) -> StoreResult<bool> {
        Self::unsupported("remove_object")
    }

    fn walk_all_objects(&self) -> StoreResult<ObjectWalk<'_>> {
        self.inner.walk_all_objects()
    }

    fn object_size(&self, id: &ObjectId) -> StoreResult<Option<u64>> {
        self.inner.object_size(id)
    }

    fn object_timestamp(&self, id: &ObjectId) -> StoreResult<Option<SystemTime>> {
        self.inner.object_timestamp(id)
    }

    fn verify_object(&self, id: &ObjectId) -> StoreResult<ObjectState> {
        self.inner.verify_object(id)
    }

    fn is_writable(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for ReadOnlyObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadOnlyObjectDatabase").finish_non_exhaustive()
    }
}

/// A writable local database layered over read-only pools.
///
/// Reads check the local database first, then each pool in order. Writes of
/// content already present in a pool are satisfied by the pool and never
/// duplicated locally. Walking, removal, sizing, and timestamps only concern
/// the local objects: the pools belong to someone else.
#[derive(Clone)]
pub struct AugmentedObjectDatabase {
    local: Arc<dyn ObjectDatabase>,
    pools: Vec<Arc<dyn ObjectDatabase>>,
}

impl AugmentedObjectDatabase {
    pub fn new(local: Arc<dyn ObjectDatabase>, pools: Vec<Arc<dyn ObjectDatabase>>) -> Self {
        Self { local, pools }
    }

    pub fn local(&self) -> &Arc<dyn ObjectDatabase> {
        &self.local
    }

    pub fn pools(&self) -> &[Arc<dyn ObjectDatabase>] {
        &self.pools
    }

    fn in_pool(&self, id: &ObjectId) -> StoreResult<bool> {
        for pool in &self.pools {
            if pool.has_object(id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl ObjectDatabase for AugmentedObjectDatabase {
    fn add_object(&self, data: &[u8]) -> StoreResult<ObjectId> {
        let id = ObjectId::from_bytes(data);
        if !self.local.has_object(&id)? && self.in_pool(&id)? {
            debug!(id = %id.short_hex(), "object already pooled");
            return Ok(id);
        }
        self.local.add_object(data)
    }

    fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.local.has_object(id)? || self.in_pool(id)?)
    }

    fn get_stream(&self, id: &ObjectId) -> StoreResult<ObjectStream> {
        match self.local.get_stream(id) {
            Err(StoreError::NotFound(_)) => {}
            other => return other,
        }
        for pool in &self.pools {
            match pool.get_stream(id) {
                Err(StoreError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(StoreError::NotFound(*id))
    }

    fn remove_object(&self, id: &ObjectId) -> StoreResult<bool> {
        self.local.remove_object(id)
    }

    fn walk_all_objects(&self) -> StoreResult<ObjectWalk<'_>> {
        self.local.walk_all_objects()
    }

    fn object_size(&self, id: &ObjectId) -> StoreResult<Option<u64>> {
        self.local.object_size(id)
    }

    fn object_timestamp(&self, id: &ObjectId) -> StoreResult<Option<SystemTime>> {
        self.local.object_timestamp(id)
    }
}

impl std::fmt::Debug for AugmentedObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentedObjectDatabase")
            .field("pools", &self.pools.len())
            .finish_non_exhaustive()
    }
}
