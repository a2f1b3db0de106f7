//! Consistency checking.
//!
//! The object-level check hash-verifies every object reachable from the
//! requested manifests and, unless dry-running, deletes the damaged ones.
//! Objects that hash-verify but do not decode as the type a tree entry
//! claims are reported as malformed and never deleted: the bytes are sound
//! and may be referenced elsewhere under their real type.
//! The manifest-level check walks the same graph without reading blobs and
//! reports whatever is structurally unavailable. Running the object check
//! first and the manifest check second shows what a repair left missing.
//!
//! Corruption never fails an operation: it is returned in the report.

use std::collections::BTreeMap;

use hive_types::{ManifestKey, ObjectId};
use hive_view::{ElementView, TreeScanner, TreeView, ViewKind};
use tracing::{info, warn};

use crate::error::OpsResult;
use crate::hive::Hive;

/// Result of [`object_check`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectCheckReport {
    /// One element per damaged object, at the first path it was found.
    pub damaged: Vec<ElementView>,
    /// One element per sound object referenced under a type it does not
    /// decode as. Never removed.
    pub malformed: Vec<ElementView>,
    /// Objects deleted from storage; empty on a dry run.
    pub removed: Vec<ObjectId>,
}

/// Result of [`manifest_check`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManifestCheckReport {
    /// One element per absent, damaged or malformed object.
    pub missing: Vec<ElementView>,
    /// References to manifests that do not exist.
    pub dangling: Vec<ManifestKey>,
}

/// Both checks, object level first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FsckReport {
    pub objects: ObjectCheckReport,
    pub manifests: ManifestCheckReport,
}

impl FsckReport {
    pub fn is_clean(&self) -> bool {
        self.objects.damaged.is_empty()
            && self.objects.malformed.is_empty()
            && self.manifests.missing.is_empty()
            && self.manifests.dangling.is_empty()
    }
}

/// Hash-verify everything reachable from `keys` (every manifest when
/// empty). With `dry_run` unset, damaged objects are deleted.
pub fn object_check(hive: &Hive, keys: &[ManifestKey], dry_run: bool) -> OpsResult<ObjectCheckReport> {
    let _tx = hive.begin()?;
    let scanner = hive.scanner().verify_blobs(true);
    let mut damaged = BTreeMap::new();
    let mut malformed = BTreeMap::new();
    for view in scan_all(hive, &scanner, keys)? {
        for element in view.damaged() {
            damaged.entry(element.id).or_insert_with(|| element.clone());
        }
        for element in view.malformed() {
            malformed.entry(element.id).or_insert_with(|| element.clone());
        }
    }
    for element in malformed.values() {
        if let ViewKind::Malformed { reason } = &element.kind {
            warn!(path = %element.path, id = %element.id.short_hex(), %reason, "malformed entry");
        }
    }

    let mut removed = Vec::new();
    for element in damaged.values() {
        if let ViewKind::Damaged { reason } = &element.kind {
            warn!(path = %element.path, id = %element.id.short_hex(), %reason, "damaged object");
        }
        if !dry_run && hive.objects().remove_object(&element.id)? {
            removed.push(element.id);
        }
    }
    if !removed.is_empty() {
        hive.audit("fsck", format!("removed {} damaged object(s)", removed.len()))?;
    }
    info!(
        damaged = damaged.len(),
        malformed = malformed.len(),
        removed = removed.len(),
        dry_run,
        "object check finished"
    );

    Ok(ObjectCheckReport {
        damaged: damaged.into_values().collect(),
        malformed: malformed.into_values().collect(),
        removed,
    })
}

/// Report every object reachable from `keys` (every manifest when empty)
/// that is absent or damaged, without repairing anything.
pub fn manifest_check(hive: &Hive, keys: &[ManifestKey]) -> OpsResult<ManifestCheckReport> {
    let scanner = hive.scanner();
    let mut missing = BTreeMap::new();
    let mut dangling = BTreeMap::new();
    for view in scan_all(hive, &scanner, keys)? {
        for element in view.missing() {
            missing.entry(element.id).or_insert_with(|| element.clone());
        }
        for element in view.dangling_refs() {
            if let ViewKind::ManifestRef { key, .. } = &element.kind {
                dangling.insert(key.clone(), ());
            }
        }
    }
    for element in missing.values() {
        warn!(path = %element.path, id = %element.id.short_hex(), "missing object");
    }
    Ok(ManifestCheckReport {
        missing: missing.into_values().collect(),
        dangling: dangling.into_keys().collect(),
    })
}

/// Object check, then manifest check over the same manifests.
pub fn fsck(hive: &Hive, keys: &[ManifestKey], dry_run: bool) -> OpsResult<FsckReport> {
    let objects = object_check(hive, keys, dry_run)?;
    let manifests = manifest_check(hive, keys)?;
    Ok(FsckReport { objects, manifests })
}

fn scan_all(hive: &Hive, scanner: &TreeScanner<'_>, keys: &[ManifestKey]) -> OpsResult<Vec<TreeView>> {
    let keys = if keys.is_empty() {
        hive.manifests().list_manifests("")?
    } else {
        keys.to_vec()
    };
    let mut views = Vec::with_capacity(keys.len());
    for key in &keys {
        views.push(scanner.scan_manifest(key)?);
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_model::{Manifest, ManifestRef, TreeBuilder};
    use hive_store::{InMemoryManifestDatabase, InMemoryObjectDatabase, ObjectDatabase};
    use std::collections::BTreeMap as Labels;
    use std::sync::Arc;

    fn key(s: &str) -> ManifestKey {
        s.parse().unwrap()
    }

    #[test]
    fn clean_store_reports_nothing() {
        let hive = Hive::in_memory();
        crate::import::import_bytes(&hive, key("app:1"), "f", b"data", Labels::new()).unwrap();
        let report = fsck(&hive, &[], false).unwrap();
        assert!(report.is_clean());
    }

    /// A store whose object database the test can corrupt directly.
    fn corruptible() -> (Hive, Arc<InMemoryObjectDatabase>) {
        let objects = Arc::new(InMemoryObjectDatabase::new());
        let hive = Hive::from_parts(
            "test",
            Arc::clone(&objects) as Arc<dyn ObjectDatabase>,
            Arc::new(InMemoryManifestDatabase::new()),
        );
        (hive, objects)
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let (hive, objects) = corruptible();
        crate::import::import_bytes(&hive, key("app:1"), "f", b"expected", Labels::new())
            .unwrap();
        let blob = ObjectId::from_bytes(b"expected");
        objects.insert_unchecked(blob, b"tampered".to_vec());

        let report = object_check(&hive, &[], true).unwrap();
        assert_eq!(report.damaged.len(), 1);
        assert_eq!(report.damaged[0].id, blob);
        assert!(report.removed.is_empty());
        assert!(objects.has_object(&blob).unwrap());
    }

    #[test]
    fn repair_then_manifest_check_sees_missing() {
        let (hive, objects) = corruptible();
        crate::import::import_bytes(&hive, key("app:1"), "f", b"expected", Labels::new())
            .unwrap();
        let blob = ObjectId::from_bytes(b"expected");
        objects.insert_unchecked(blob, b"tampered".to_vec());

        let first = object_check(&hive, &[key("app:1")], false).unwrap();
        assert_eq!(first.damaged.len(), 1);
        assert_eq!(first.removed, vec![blob]);
        let second = object_check(&hive, &[key("app:1")], false).unwrap();
        assert!(second.damaged.is_empty());

        let report = manifest_check(&hive, &[key("app:1")]).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].kind, ViewKind::Missing);
        assert_eq!(report.missing[0].path.to_string(), "f");
    }

    #[test]
    fn damaged_tree_counts_as_missing() {
        let (hive, objects) = corruptible();
        crate::import::import_bytes(&hive, key("app:1"), "f", b"data", Labels::new()).unwrap();
        let root = crate::manifest::load(&hive, &key("app:1")).unwrap().root();
        objects.insert_unchecked(root, b"not a tree".to_vec());

        let report = manifest_check(&hive, &[]).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert!(report.missing[0].is_damaged());
    }

    #[test]
    fn sound_object_under_wrong_type_is_never_removed() {
        let hive = Hive::in_memory();
        let blob_owner =
            crate::import::import_bytes(&hive, key("a:1"), "notes.txt", b"just text", Labels::new())
                .unwrap();
        let text = ObjectId::from_bytes(b"just text");
        let mut builder = TreeBuilder::new();
        builder.add_tree("sub", text).unwrap();
        let root = hive.add_tree(&builder.build()).unwrap();
        crate::manifest::insert(&hive, &Manifest::builder(key("b:1")).root(root).build().unwrap())
            .unwrap();

        let report = object_check(&hive, &[], false).unwrap();
        assert!(report.damaged.is_empty());
        assert!(report.removed.is_empty());
        assert_eq!(report.malformed.len(), 1);
        assert_eq!(report.malformed[0].id, text);
        assert_eq!(report.malformed[0].path.to_string(), "sub");

        assert!(hive.objects().has_object(&text).unwrap());
        assert!(fsck(&hive, &[blob_owner], false).unwrap().is_clean());
        let claimed = manifest_check(&hive, &[key("b:1")]).unwrap();
        assert_eq!(claimed.missing.len(), 1);
        assert!(claimed.missing[0].is_malformed());
    }

    #[test]
    fn dangling_reference_is_reported_by_key() {
        let hive = Hive::in_memory();
        let reference = hive
            .objects()
            .add_object(&ManifestRef::new(key("gone:1")).encode().unwrap())
            .unwrap();
        let mut builder = TreeBuilder::new();
        builder.add_manifest_ref("dep", reference).unwrap();
        let root = hive.add_tree(&builder.build()).unwrap();
        crate::manifest::insert(&hive, &Manifest::builder(key("app:1")).root(root).build().unwrap())
            .unwrap();

        let report = manifest_check(&hive, &[key("app:1")]).unwrap();
        assert!(report.missing.is_empty());
        assert_eq!(report.dangling, vec![key("gone:1")]);
    }

    #[test]
    fn shared_missing_object_is_reported_once() {
        let hive = Hive::in_memory();
        let ghost = ObjectId::from_bytes(b"ghost");
        for (name, other) in [("a:1", "x"), ("b:1", "y")] {
            let extra = hive.objects().add_object(other.as_bytes()).unwrap();
            let mut builder = TreeBuilder::new();
            builder.add_blob("shared", ghost).unwrap();
            builder.add_blob("own", extra).unwrap();
            let root = hive.add_tree(&builder.build()).unwrap();
            hive.manifests()
                .add_manifest(&Manifest::builder(key(name)).root(root).build().unwrap())
                .unwrap();
        }
        let report = manifest_check(&hive, &[]).unwrap();
        assert_eq!(report.missing.len(), 1);
    }
}
