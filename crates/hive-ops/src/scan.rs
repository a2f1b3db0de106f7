//! Read-only queries over stored trees.

use std::collections::BTreeSet;
use std::io::Read;

use hive_model::{EntryType, ManifestRef};
use hive_types::{ManifestKey, ObjectId};
use hive_view::{TreeView, ViewKind};

use crate::error::{OpsError, OpsResult};
use crate::hive::Hive;
use crate::manifest;

/// Snapshot of the tree rooted at `root`. Elements deeper than `max_depth`
/// are left unscanned.
pub fn scan_tree(hive: &Hive, root: ObjectId, max_depth: Option<usize>) -> OpsResult<TreeView> {
    Ok(hive.scanner().max_depth(max_depth).scan_tree(root)?)
}

/// Snapshot of a manifest's tree.
pub fn scan_manifest(
    hive: &Hive,
    key: &ManifestKey,
    max_depth: Option<usize>,
) -> OpsResult<TreeView> {
    Ok(hive.scanner().max_depth(max_depth).scan_manifest(key)?)
}

/// Every manifest referenced, directly or transitively, from `root`.
/// Dangling references are included.
pub fn manifest_refs(hive: &Hive, root: ObjectId) -> OpsResult<BTreeSet<ManifestKey>> {
    let view = scan_tree(hive, root, None)?;
    Ok(view
        .iter()
        .filter_map(|(_, element)| match &element.kind {
            ViewKind::ManifestRef { key, .. } => Some(key.clone()),
            _ => None,
        })
        .collect())
}

/// `keys` plus every manifest they reference, transitively.
pub fn manifest_closure(hive: &Hive, keys: &[ManifestKey]) -> OpsResult<BTreeSet<ManifestKey>> {
    let mut closure = BTreeSet::new();
    for key in keys {
        let root = manifest::load(hive, key)?.root();
        closure.insert(key.clone());
        closure.extend(manifest_refs(hive, root)?);
    }
    Ok(closure)
}

/// Bytes of the file at `path` (slash separated) in the tree of `key`.
/// References to other manifests are followed.
pub fn tree_entry_load(hive: &Hive, key: &ManifestKey, path: &str) -> OpsResult<Vec<u8>> {
    let not_found = || OpsError::EntryNotFound {
        key: key.clone(),
        path: path.to_string(),
    };
    let mut current = manifest::load(hive, key)?.root();
    let mut current_type = EntryType::Tree;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if current_type == EntryType::Manifest {
            current = resolve_ref(hive, &current)?;
        }
        if current_type == EntryType::Blob {
            return Err(not_found());
        }
        let tree = hive.load_tree(&current)?;
        let (entry, id) = tree.get(segment).ok_or_else(not_found)?;
        current = *id;
        current_type = entry.entry_type;
    }
    if current_type != EntryType::Blob {
        return Err(not_found());
    }

    let mut data = Vec::new();
    hive.objects().get_stream(&current)?.read_to_end(&mut data)?;
    Ok(data)
}

fn resolve_ref(hive: &Hive, id: &ObjectId) -> OpsResult<ObjectId> {
    let bytes = hive
        .objects()
        .read_object(id)?
        .ok_or(OpsError::ObjectNotFound(*id))?;
    let reference = ManifestRef::decode(&bytes)?;
    Ok(manifest::load(hive, &reference.key)?.root())
}

/// Total stored size of `ids`; absent objects count as zero.
pub fn object_size<'a>(
    hive: &Hive,
    ids: impl IntoIterator<Item = &'a ObjectId>,
) -> OpsResult<u64> {
    let mut total = 0;
    for id in ids {
        total += hive.objects().object_size(id)?.unwrap_or(0);
    }
    Ok(total)
}
