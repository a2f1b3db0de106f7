//! Reachability queries used by prune, copy and replication.

use std::collections::{BTreeMap, BTreeSet};

use hive_model::EntryType;
use hive_types::{ManifestKey, ObjectId};

use crate::error::OpsResult;
use crate::hive::Hive;

/// Every object reachable from `roots`, minus everything reachable from
/// `exclude`. Objects missing from storage are included: the caller decides
/// whether that is an error.
pub fn required_objects(
    hive: &Hive,
    roots: &[ObjectId],
    exclude: &[ObjectId],
) -> OpsResult<BTreeSet<ObjectId>> {
    let mut required = reachable(hive, roots)?;
    if !exclude.is_empty() {
        let excluded = reachable(hive, exclude)?;
        required.retain(|id| !excluded.contains(id));
    }
    Ok(required)
}

/// Ids of every tree reachable from `root`, `root` included.
pub fn required_trees(hive: &Hive, root: ObjectId) -> OpsResult<BTreeSet<ObjectId>> {
    let view = hive.scanner().scan_tree(root)?;
    Ok(view
        .iter()
        .filter(|(_, element)| element.entry_type == EntryType::Tree)
        .map(|(_, element)| element.id)
        .collect())
}

/// The members of `candidates` this store does not hold.
pub fn missing_objects(
    hive: &Hive,
    candidates: &BTreeSet<ObjectId>,
) -> OpsResult<BTreeSet<ObjectId>> {
    let mut missing = BTreeSet::new();
    for id in candidates {
        if !hive.objects().has_object(id)? {
            missing.insert(*id);
        }
    }
    Ok(missing)
}

/// Root tree of every manifest whose name starts with one of `filters`;
/// every manifest when `filters` is empty.
pub fn manifest_inventory(
    hive: &Hive,
    filters: &[String],
) -> OpsResult<BTreeMap<ManifestKey, ObjectId>> {
    let keys: BTreeSet<ManifestKey> = if filters.is_empty() {
        hive.manifests().list_manifests("")?.into_iter().collect()
    } else {
        let mut keys = BTreeSet::new();
        for filter in filters {
            keys.extend(hive.manifests().list_manifests(filter)?);
        }
        keys
    };

    let mut inventory = BTreeMap::new();
    for key in keys {
        // Removed between listing and loading: not part of the inventory.
        if let Some(manifest) = hive.manifests().get_manifest(&key)? {
            inventory.insert(key, manifest.root());
        }
    }
    Ok(inventory)
}

fn reachable(hive: &Hive, roots: &[ObjectId]) -> OpsResult<BTreeSet<ObjectId>> {
    let scanner = hive.scanner();
    let mut seen = BTreeSet::new();
    for root in roots {
        if seen.contains(root) {
            continue;
        }
        let view = scanner.scan_tree(*root)?;
        seen.extend(view.iter().map(|(_, element)| element.id));
    }
    Ok(seen)
}
