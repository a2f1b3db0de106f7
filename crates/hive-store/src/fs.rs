//! Filesystem-backed object and manifest databases.
//!
//! # Layout
//!
//! ```text
//! objects/ab/ab12…ef      object bytes, fanned out by the first two hex digits
//! manifests/app/web/7.mf  manifest `app/web:7` as JSON
//! tmp/                    staging area; every write lands here first
//! ```
//!
//! Writes go to a temporary file in the staging directory and are renamed
//! into place, so a crash never leaves a partial object or manifest under its
//! final name. The staging directory must live on the same filesystem.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use hive_model::Manifest;
use hive_types::{ManifestKey, ObjectId, ObjectIdHasher};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::traits::{not_found, ManifestDatabase, ObjectDatabase, ObjectStream, ObjectWalk};

const MANIFEST_EXT: &str = "mf";
const COPY_BUF: usize = 64 * 1024;

/// Object database storing one file per object.
#[derive(Debug)]
pub struct FsObjectDatabase {
    dir: PathBuf,
    staging: PathBuf,
    fsync: bool,
}

impl FsObjectDatabase {
    /// Open (or create) an object directory with the given staging directory.
    pub fn open(dir: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        let staging = staging.into();
        fs::create_dir_all(&dir)?;
        fs::create_dir_all(&staging)?;
        Ok(Self {
            dir,
            staging,
            fsync: false,
        })
    }

    /// `fsync` every object before it becomes visible.
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final location of an object's file.
    pub fn object_path(&self, id: &ObjectId) -> PathBuf {
        let hex = id.to_hex();
        self.dir.join(&hex[..2]).join(hex)
    }

    fn touch(&self, path: &Path) -> StoreResult<()> {
        File::options()
            .write(true)
            .open(path)?
            .set_modified(SystemTime::now())?;
        Ok(())
    }

    fn commit(&self, staged: NamedTempFile, id: ObjectId) -> StoreResult<ObjectId> {
        let path = self.object_path(&id);
        if path.exists() {
            // Refreshing the timestamp keeps a re-added object out of reach of
            // a prune that started before this write.
            self.touch(&path)?;
            return Ok(id);
        }
        if self.fsync {
            staged.as_file().sync_all()?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        staged.persist(&path).map_err(|e| e.error)?;
        debug!(id = %id.short_hex(), "stored object");
        Ok(id)
    }
}

impl ObjectDatabase for FsObjectDatabase {
    fn add_object(&self, data: &[u8]) -> StoreResult<ObjectId> {
        let id = ObjectId::from_bytes(data);
        let path = self.object_path(&id);
        if path.exists() {
            self.touch(&path)?;
            return Ok(id);
        }
        let mut staged = NamedTempFile::new_in(&self.staging)?;
        staged.write_all(data)?;
        self.commit(staged, id)
    }

    fn add_stream(&self, reader: &mut dyn Read) -> StoreResult<ObjectId> {
        let mut staged = NamedTempFile::new_in(&self.staging)?;
        let mut hasher = ObjectIdHasher::new();
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            staged.write_all(&buf[..n])?;
        }
        self.commit(staged, hasher.finish())
    }

    fn has_object(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.object_path(id).is_file())
    }

    fn get_stream(&self, id: &ObjectId) -> StoreResult<ObjectStream> {
        let file = File::open(self.object_path(id)).map_err(not_found(id))?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn remove_object(&self, id: &ObjectId) -> StoreResult<bool> {
        match fs::remove_file(self.object_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn walk_all_objects(&self) -> StoreResult<ObjectWalk<'_>> {
        let walk = WalkDir::new(&self.dir)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let name = entry.file_name().to_str()?;
                    let id = ObjectId::from_hex(name).ok()?;
                    // Stray files outside their fan-out directory are not objects.
                    let shard = entry.path().parent()?.file_name()?.to_str()?;
                    (name.starts_with(shard) && shard.len() == 2).then_some(Ok(id))
                }
                Ok(_) => None,
                Err(e) => Some(Err(StoreError::Io(e.into()))),
            });
        Ok(Box::new(walk))
    }

    fn object_size(&self, id: &ObjectId) -> StoreResult<Option<u64>> {
        match fs::metadata(self.object_path(id)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn object_timestamp(&self, id: &ObjectId) -> StoreResult<Option<SystemTime>> {
        match fs::metadata(self.object_path(id)) {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Manifest database storing one JSON file per manifest.
///
/// Name segments become directories and the tag becomes the file name. The
/// key stored inside the file is authoritative when listing.
#[derive(Debug)]
pub struct FsManifestDatabase {
    dir: PathBuf,
    staging: PathBuf,
    fsync: bool,
}

impl FsManifestDatabase {
    pub fn open(dir: impl Into<PathBuf>, staging: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        let staging = staging.into();
        fs::create_dir_all(&dir)?;
        fs::create_dir_all(&staging)?;
        Ok(Self {
            dir,
            staging,
            fsync: false,
        })
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    fn manifest_path(&self, key: &ManifestKey) -> StoreResult<PathBuf> {
        let suffix = format!(".{MANIFEST_EXT}");
        let mut path = self.dir.clone();
        for segment in key.name().split('/') {
            if segment.ends_with(&suffix) {
                return Err(StoreError::InvalidKey {
                    key: key.to_string(),
                    reason: format!("name segment {segment:?} collides with manifest files"),
                });
            }
            path.push(segment);
        }
        path.push(format!("{}{suffix}", key.tag()));
        Ok(path)
    }

    fn read_file(path: &Path) -> StoreResult<Manifest> {
        let data = fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", path.display())))
    }

    fn remove_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.dir || fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl ManifestDatabase for FsManifestDatabase {
    fn add_manifest(&self, manifest: &Manifest) -> StoreResult<()> {
        let path = self.manifest_path(manifest.key())?;
        if path.exists() {
            return Err(StoreError::ManifestExists(manifest.key().clone()));
        }
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut staged = NamedTempFile::new_in(&self.staging)?;
        staged.write_all(&data)?;
        if self.fsync {
            staged.as_file().sync_all()?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match staged.persist_noclobber(&path) {
            Ok(_) => {
                debug!(key = %manifest.key(), "stored manifest");
                Ok(())
            }
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::ManifestExists(manifest.key().clone()))
            }
            Err(e) => Err(e.error.into()),
        }
    }

    fn get_manifest(&self, key: &ManifestKey) -> StoreResult<Option<Manifest>> {
        let path = self.manifest_path(key)?;
        match Self::read_file(&path) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn has_manifest(&self, key: &ManifestKey) -> StoreResult<bool> {
        Ok(self.manifest_path(key)?.is_file())
    }

    fn remove_manifest(&self, key: &ManifestKey) -> StoreResult<bool> {
        let path = self.manifest_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                self.remove_empty_parents(&path);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads take no lock: files or directories removed while the listing
    /// runs are skipped.
    fn list_manifests(&self, name_prefix: &str) -> StoreResult<Vec<ManifestKey>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(self.listing_root(name_prefix)).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(io::Error::kind) == Some(io::ErrorKind::NotFound) => {
                    continue
                }
                Err(e) => return Err(StoreError::Io(e.into())),
            };
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(MANIFEST_EXT)
                || !self.stored_name(path).starts_with(name_prefix)
            {
                continue;
            }
            let manifest = match Self::read_file(path) {
                Ok(manifest) => manifest,
                Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if self.manifest_path(manifest.key())? != path {
                warn!(path = %path.display(), key = %manifest.key(), "manifest stored under a foreign path");
            }
            if manifest.key().name().starts_with(name_prefix) {
                keys.push(manifest.key().clone());
            }
        }
        keys.sort();
        Ok(keys)
    }
}

impl FsManifestDatabase {
    /// Deepest directory holding every name that starts with `prefix`.
    fn listing_root(&self, prefix: &str) -> PathBuf {
        let mut root = self.dir.clone();
        let Some((dirs, _)) = prefix.rsplit_once('/') else {
            return root;
        };
        for segment in dirs.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return self.dir.clone();
            }
            root.push(segment);
        }
        root
    }

    /// Manifest name implied by a file's location.
    fn stored_name(&self, path: &Path) -> String {
        path.parent()
            .and_then(|dir| dir.strip_prefix(&self.dir).ok())
            .map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ObjectState;
    use tempfile::TempDir;

    fn object_db(tmp: &TempDir) -> FsObjectDatabase {
        FsObjectDatabase::open(tmp.path().join("objects"), tmp.path().join("tmp")).unwrap()
    }

    fn manifest_db(tmp: &TempDir) -> FsManifestDatabase {
        FsManifestDatabase::open(tmp.path().join("manifests"), tmp.path().join("tmp")).unwrap()
    }

    fn manifest(key: &str) -> Manifest {
        Manifest::builder(key.parse().unwrap())
            .root(ObjectId::from_bytes(b"root"))
            .label("os", "linux")
            .build()
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    #[test]
    fn objects_are_fanned_out() {
        let tmp = TempDir::new().unwrap();
        let db = object_db(&tmp);
        let id = db.add_object(b"hello").unwrap();
        let hex = id.to_hex();
        let expected = tmp.path().join("objects").join(&hex[..2]).join(&hex);
        assert_eq!(db.object_path(&id), expected);
        assert_eq!(fs::read(expected).unwrap(), b"hello");
    }

    #[test]
    fn add_is_idempotent_on_disk() {
        let tmp = TempDir::new().unwrap();
        let db = object_db(&tmp).with_fsync(true);
        let a = db.add_object(b"same").unwrap();
        let b = db.add_object(b"same").unwrap();
        assert_eq!(a, b);
        let count = db.walk_all_objects().unwrap().count();
        assert_eq!(count, 1);
        // Staging is empty after every write.
        assert_eq!(fs::read_dir(tmp.path().join("tmp")).unwrap().count(), 0);
    }

    #[test]
    fn stream_add_matches_slice_add() {
        let tmp = TempDir::new().unwrap();
        let db = object_db(&tmp);
        let data = vec![42u8; 200_000];
        let from_stream = db.add_stream(&mut data.as_slice()).unwrap();
        assert_eq!(from_stream, ObjectId::from_bytes(&data));
        assert_eq!(db.object_size(&from_stream).unwrap(), Some(200_000));
        assert_eq!(db.read_object(&from_stream).unwrap().unwrap(), data);
    }

    #[test]
    fn walk_ignores_stray_files() {
        let tmp = TempDir::new().unwrap();
        let db = object_db(&tmp);
        let id = db.add_object(b"real").unwrap();
        fs::write(tmp.path().join("objects").join("README"), b"x").unwrap();
        fs::create_dir_all(tmp.path().join("objects").join("zz")).unwrap();
        fs::write(tmp.path().join("objects").join("zz").join("junk"), b"x").unwrap();
        let ids: Vec<_> = db.walk_all_objects().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(ids, vec![id]);
    }

    #[test]
    fn missing_and_removed_objects() {
        let tmp = TempDir::new().unwrap();
        let db = object_db(&tmp);
        let id = db.add_object(b"gone soon").unwrap();
        assert!(db.remove_object(&id).unwrap());
        assert!(!db.remove_object(&id).unwrap());
        assert!(matches!(db.get_stream(&id), Err(StoreError::NotFound(_))));
        assert_eq!(db.object_size(&id).unwrap(), None);
        assert_eq!(db.object_timestamp(&id).unwrap(), None);
    }

    #[test]
    fn corrupted_file_is_damaged() {
        let tmp = TempDir::new().unwrap();
        let db = object_db(&tmp);
        let id = db.add_object(b"original").unwrap();
        fs::write(db.object_path(&id), b"bit rot").unwrap();
        assert!(matches!(db.verify_object(&id).unwrap(), ObjectState::Damaged(_)));
    }

    // -----------------------------------------------------------------------
    // Manifests
    // -----------------------------------------------------------------------

    #[test]
    fn manifest_roundtrip_on_disk() {
        let tmp = TempDir::new().unwrap();
        let db = manifest_db(&tmp);
        let m = manifest("app/web:7");
        db.add_manifest(&m).unwrap();
        assert!(tmp.path().join("manifests/app/web/7.mf").is_file());
        assert_eq!(db.get_manifest(m.key()).unwrap(), Some(m.clone()));
        assert!(matches!(
            db.add_manifest(&m),
            Err(StoreError::ManifestExists(_))
        ));
    }

    #[test]
    fn list_and_remove() {
        let tmp = TempDir::new().unwrap();
        let db = manifest_db(&tmp);
        for key in ["app:2", "app:10", "app/web:1", "lib:1"] {
            db.add_manifest(&manifest(key)).unwrap();
        }
        let all: Vec<String> = db
            .list_manifests("")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(all, vec!["app:10", "app:2", "app/web:1", "lib:1"]);
        assert_eq!(db.list_manifests("app").unwrap().len(), 3);

        let key: ManifestKey = "app/web:1".parse().unwrap();
        assert!(db.remove_manifest(&key).unwrap());
        assert!(!tmp.path().join("manifests/app/web").exists());
        assert!(db.get_manifest(&key).unwrap().is_none());
        assert_eq!(db.list_manifests("app").unwrap().len(), 2);
    }

    #[test]
    fn prefix_skips_unrelated_files() {
        let tmp = TempDir::new().unwrap();
        let db = manifest_db(&tmp);
        for key in ["app/web:1", "app/worker:1", "lib:1"] {
            db.add_manifest(&manifest(key)).unwrap();
        }
        // Unreadable, but outside every listed prefix below.
        fs::write(tmp.path().join("manifests/lib/2.mf"), b"{").unwrap();
        let listed: Vec<String> = db
            .list_manifests("app/w")
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(listed, vec!["app/web:1", "app/worker:1"]);
        assert_eq!(db.list_manifests("app/web").unwrap().len(), 1);
        assert!(db.list_manifests("nothing/here").unwrap().is_empty());
        assert!(db.list_manifests("lib").is_err());
    }

    #[test]
    fn listing_tolerates_concurrent_removal() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let tmp = TempDir::new().unwrap();
        let db = Arc::new(manifest_db(&tmp));
        db.add_manifest(&manifest("stable:1")).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let (db, done) = (Arc::clone(&db), Arc::clone(&done));
            std::thread::spawn(move || {
                for n in 0..2000 {
                    let m = manifest(&format!("app/v{}:{n}", n % 7));
                    db.add_manifest(&m).unwrap();
                    assert!(db.remove_manifest(m.key()).unwrap());
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        loop {
            let finished = done.load(Ordering::SeqCst);
            let keys = db.list_manifests("").unwrap();
            assert!(keys.contains(&"stable:1".parse().unwrap()));
            if finished {
                break;
            }
        }
        writer.join().unwrap();
        assert_eq!(db.list_manifests("").unwrap().len(), 1);
    }

    #[test]
    fn colliding_segment_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let db = manifest_db(&tmp);
        let err = db.add_manifest(&manifest("a/b.mf:1")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey { .. }));
    }

    #[test]
    fn corrupt_manifest_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let db = manifest_db(&tmp);
        fs::write(tmp.path().join("manifests").join("x.mf"), b"{").unwrap();
        assert!(matches!(
            db.list_manifests(""),
            Err(StoreError::Serialization(_))
        ));
    }
}
