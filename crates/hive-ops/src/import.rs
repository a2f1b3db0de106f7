//! Ingesting content: directories, raw bytes and prebuilt trees.
//!
//! Every import runs in one write scope and stores bottom-up: blobs, then
//! the trees that name them, then the manifest. A manifest therefore never
//! becomes visible before everything it references exists.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};

use hive_model::{Manifest, Tree, TreeBuilder};
use hive_types::{ManifestKey, ObjectId};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{OpsError, OpsResult};
use crate::hive::Hive;

/// Store the directory `source` as a tree and record it under `key`.
///
/// Symbolic links and other special files are skipped with a warning.
pub fn import_directory(
    hive: &Hive,
    source: &Path,
    key: ManifestKey,
    labels: BTreeMap<String, String>,
) -> OpsResult<ManifestKey> {
    if !source.is_dir() {
        return Err(OpsError::InvalidPath {
            path: source.to_path_buf(),
            reason: "not a directory".into(),
        });
    }
    let tx = hive.begin()?;
    let root = store_directory(hive, source)?;
    let manifest = Manifest::builder(key.clone())
        .root(root)
        .labels(labels)
        .build()?;
    hive.manifests().add_manifest(&manifest)?;
    hive.audit("import", format!("{key} from {}", source.display()))?;
    tx.commit()?;
    info!(%key, root = %root.short_hex(), "imported directory");
    Ok(key)
}

/// Store `data` as the single file `file_name` of a new manifest.
pub fn import_bytes(
    hive: &Hive,
    key: ManifestKey,
    file_name: &str,
    data: &[u8],
    labels: BTreeMap<String, String>,
) -> OpsResult<ManifestKey> {
    let tx = hive.begin()?;
    let blob = hive.objects().add_object(data)?;
    let mut builder = TreeBuilder::new();
    builder.add_blob(file_name, blob)?;
    let root = hive.add_tree(&builder.build())?;
    let manifest = Manifest::builder(key.clone())
        .root(root)
        .labels(labels)
        .build()?;
    hive.manifests().add_manifest(&manifest)?;
    hive.audit("import", format!("{key} ({} bytes)", data.len()))?;
    tx.commit()?;
    Ok(key)
}

/// Store a prebuilt tree whose entries must all exist already.
pub fn insert_tree(hive: &Hive, tree: &Tree) -> OpsResult<ObjectId> {
    let _tx = hive.begin()?;
    for (_, id) in tree.iter() {
        if !hive.objects().has_object(id)? {
            return Err(OpsError::ObjectNotFound(*id));
        }
    }
    hive.add_tree(tree)
}

fn entry_name(path: &Path) -> OpsResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| OpsError::InvalidPath {
            path: path.to_path_buf(),
            reason: "file name is not valid UTF-8".into(),
        })
}

/// Walk `source` children-first so each directory's tree is built after
/// all of its entries are stored.
fn store_directory(hive: &Hive, source: &Path) -> OpsResult<ObjectId> {
    let mut pending: HashMap<PathBuf, TreeBuilder> = HashMap::new();
    let walker = WalkDir::new(source)
        .follow_links(false)
        .contents_first(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| match e.into_io_error() {
            Some(io) => OpsError::Io(io),
            None => OpsError::InvalidPath {
                path: source.to_path_buf(),
                reason: "filesystem loop".into(),
            },
        })?;
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let tree = pending.remove(path).unwrap_or_default().build();
            let id = hive.add_tree(&tree)?;
            if entry.depth() == 0 {
                return Ok(id);
            }
            parent_builder(&mut pending, path).add_tree(entry_name(path)?, id)?;
        } else if file_type.is_file() {
            let mut file = File::open(path)?;
            let id = hive.objects().add_stream(&mut file)?;
            debug!(path = %path.display(), id = %id.short_hex(), "stored file");
            parent_builder(&mut pending, path).add_blob(entry_name(path)?, id)?;
        } else {
            warn!(path = %path.display(), "skipping special file");
        }
    }
    Err(OpsError::InvalidPath {
        path: source.to_path_buf(),
        reason: "directory vanished during import".into(),
    })
}

fn parent_builder<'a>(
    pending: &'a mut HashMap<PathBuf, TreeBuilder>,
    path: &Path,
) -> &'a mut TreeBuilder {
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
    pending.entry(parent).or_default()
}
