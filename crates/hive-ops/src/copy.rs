//! Transferring manifests and their objects between two stores.

use std::collections::BTreeSet;

use hive_types::{ManifestKey, ObjectId};
use tracing::{debug, info};

use crate::error::{OpsError, OpsResult};
use crate::hive::Hive;
use crate::manifest;
use crate::required::required_objects;
use crate::scan::manifest_closure;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Manifests inserted on the destination.
    pub manifests: Vec<ManifestKey>,
    /// Objects written to the destination.
    pub objects: usize,
    pub bytes: u64,
}

/// Copy `keys`, every manifest they reference, and the objects all of them
/// reach, from `src` to `dst`.
///
/// Without `partial_allowed` the source must hold every required object and
/// all of them are written. With it, objects the destination already holds
/// are neither required on the source nor written again. Manifests are
/// inserted only after every object is in place; keys the destination
/// already has are left untouched.
pub fn copy(
    src: &Hive,
    dst: &Hive,
    keys: &[ManifestKey],
    partial_allowed: bool,
) -> OpsResult<CopyReport> {
    let closure = manifest_closure(src, keys)?;
    let mut manifests = Vec::with_capacity(closure.len());
    let mut roots = Vec::with_capacity(closure.len());
    for key in &closure {
        // Dangling references stay dangling on the destination too.
        if let Some(m) = src.manifests().get_manifest(key)? {
            roots.push(m.root());
            manifests.push(m);
        }
    }
    let required = required_objects(src, &roots, &[])?;

    let tx = dst.begin()?;
    let mut to_copy: Vec<ObjectId> = Vec::with_capacity(required.len());
    let mut unavailable = BTreeSet::new();
    for id in &required {
        let on_dst = partial_allowed && dst.objects().has_object(id)?;
        if on_dst {
            continue;
        }
        if src.objects().has_object(id)? {
            to_copy.push(*id);
        } else {
            unavailable.insert(*id);
        }
    }
    if !unavailable.is_empty() {
        return Err(OpsError::Incomplete {
            context: format!("copy from {}", src.name()),
            count: unavailable.len(),
        });
    }

    let mut report = CopyReport::default();
    for id in &to_copy {
        let mut stream = src.objects().get_stream(id)?;
        let written = dst.objects().add_stream(&mut stream)?;
        if written != *id {
            return Err(OpsError::Incomplete {
                context: format!("object {id} on {} does not hash-verify", src.name()),
                count: 1,
            });
        }
        report.bytes += dst.objects().object_size(id)?.unwrap_or(0);
        report.objects += 1;
        debug!(id = %id.short_hex(), "copied object");
    }

    for m in &manifests {
        if dst.manifests().has_manifest(m.key())? {
            continue;
        }
        dst.manifests().add_manifest(m)?;
        report.manifests.push(m.key().clone());
    }

    dst.audit(
        "copy",
        format!(
            "{} manifest(s), {} object(s) from {}",
            report.manifests.len(),
            report.objects,
            src.name()
        ),
    )?;
    tx.commit()?;
    info!(
        manifests = report.manifests.len(),
        objects = report.objects,
        bytes = report.bytes,
        "copy finished"
    );
    Ok(report)
}

/// Whether `dst` holds `key` and everything it reaches.
pub fn is_complete(dst: &Hive, key: &ManifestKey) -> OpsResult<bool> {
    let root = manifest::load(dst, key)?.root();
    let view = dst.scanner().scan_tree(root)?;
    Ok(view.missing().next().is_none() && view.dangling_refs().next().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_model::{Manifest, ManifestRef, TreeBuilder};
    use std::collections::BTreeMap;

    fn key(s: &str) -> ManifestKey {
        s.parse().unwrap()
    }

    fn with_reference(hive: &Hive) {
        crate::import::import_bytes(hive, key("lib:1"), "lib.so", b"elf", BTreeMap::new())
            .unwrap();
        let reference = hive
            .objects()
            .add_object(&ManifestRef::new(key("lib:1")).encode().unwrap())
            .unwrap();
        let conf = hive.objects().add_object(b"conf").unwrap();
        let mut builder = TreeBuilder::new();
        builder.add_blob("app.conf", conf).unwrap();
        builder.add_manifest_ref("lib", reference).unwrap();
        let root = hive.add_tree(&builder.build()).unwrap();
        manifest::insert(hive, &Manifest::builder(key("app:1")).root(root).build().unwrap())
            .unwrap();
    }

    #[test]
    fn full_copy_brings_references_along() {
        let (src, dst) = (Hive::in_memory(), Hive::in_memory());
        with_reference(&src);
        let report = copy(&src, &dst, &[key("app:1")], false).unwrap();
        assert_eq!(report.manifests, vec![key("app:1"), key("lib:1")]);
        assert_eq!(report.objects, 5);
        assert!(is_complete(&dst, &key("app:1")).unwrap());
        assert!(is_complete(&dst, &key("lib:1")).unwrap());
    }

    #[test]
    fn partial_copy_skips_what_destination_has() {
        let (src, dst) = (Hive::in_memory(), Hive::in_memory());
        with_reference(&src);
        copy(&src, &dst, &[key("lib:1")], false).unwrap();

        let report = copy(&src, &dst, &[key("app:1")], true).unwrap();
        assert_eq!(report.manifests, vec![key("app:1")]);
        // app root, app.conf and the reference object.
        assert_eq!(report.objects, 3);
    }

    #[test]
    fn missing_source_object_fails_full_copy_only_when_needed() {
        let (src, dst) = (Hive::in_memory(), Hive::in_memory());
        let shared = dst.objects().add_object(b"only on dst").unwrap();
        let mut builder = TreeBuilder::new();
        builder.add_blob("f", shared).unwrap();
        let root = src.add_tree(&builder.build()).unwrap();
        src.manifests()
            .add_manifest(&Manifest::builder(key("app:1")).root(root).build().unwrap())
            .unwrap();

        assert!(matches!(
            copy(&src, &dst, &[key("app:1")], false),
            Err(OpsError::Incomplete { count: 1, .. })
        ));
        assert!(!dst.manifests().has_manifest(&key("app:1")).unwrap());

        let report = copy(&src, &dst, &[key("app:1")], true).unwrap();
        assert_eq!(report.objects, 1);
        assert!(is_complete(&dst, &key("app:1")).unwrap());
    }

    #[test]
    fn unknown_manifest_fails() {
        let (src, dst) = (Hive::in_memory(), Hive::in_memory());
        assert!(matches!(
            copy(&src, &dst, &[key("nope:1")], true),
            Err(OpsError::ManifestNotFound(_))
        ));
    }
}
