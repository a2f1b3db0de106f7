//! Moving bundles in and out of a store.

use std::collections::BTreeSet;

use hive_ops::{manifest, Hive, OpsError};
use hive_types::{ManifestKey, ObjectId};
use tracing::{debug, info, warn};

use crate::error::{PackError, PackResult};
use crate::reader::BundleReader;
use crate::writer::BundleWriter;

/// Outcome of [`apply_bundle`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub objects_written: usize,
    /// Objects the store already held.
    pub objects_present: usize,
    pub manifests_added: Vec<ManifestKey>,
    /// Manifests whose key the store already had.
    pub manifests_skipped: Vec<ManifestKey>,
}

/// Collect `objects` and the manifests named by `keys` from `hive` into a
/// bundle. Every object must be present.
pub fn bundle_from_store(
    hive: &Hive,
    objects: &BTreeSet<ObjectId>,
    keys: &[ManifestKey],
) -> PackResult<BundleWriter> {
    let mut writer = BundleWriter::new();
    for id in objects {
        let data = hive
            .objects()
            .read_object(id)?
            .ok_or(OpsError::ObjectNotFound(*id))?;
        let written = writer.add_object(&data);
        if written != *id {
            return Err(PackError::HashMismatch {
                expected: *id,
                actual: written,
            });
        }
    }
    for key in keys {
        writer.add_manifest(&manifest::load(hive, key)?)?;
    }
    debug!(
        objects = writer.object_count(),
        manifests = writer.manifest_count(),
        "bundled from {}",
        hive.name()
    );
    Ok(writer)
}

/// Write the content of `bundle` into `hive` in one write scope.
///
/// Objects go in first. A manifest is inserted only if its root tree is
/// then present; existing keys are left as they are.
pub fn apply_bundle(hive: &Hive, bundle: &BundleReader) -> PackResult<ApplyReport> {
    let tx = hive.begin()?;
    let mut report = ApplyReport::default();

    for id in bundle.object_ids() {
        if hive.objects().has_object(id)? {
            report.objects_present += 1;
            continue;
        }
        let data = bundle
            .read_object(id)?
            .ok_or(OpsError::ObjectNotFound(*id))?;
        hive.objects().add_object(&data)?;
        report.objects_written += 1;
    }

    for m in bundle.manifests()? {
        if hive.manifests().has_manifest(m.key())? {
            warn!(key = %m.key(), "manifest already present, skipped");
            report.manifests_skipped.push(m.key().clone());
            continue;
        }
        if !hive.objects().has_object(&m.root())? {
            return Err(OpsError::ObjectNotFound(m.root()).into());
        }
        hive.manifests().add_manifest(&m)?;
        report.manifests_added.push(m.key().clone());
    }

    hive.audit(
        "bundle-apply",
        format!(
            "{} object(s), {} manifest(s)",
            report.objects_written,
            report.manifests_added.len()
        ),
    )?;
    tx.commit()?;
    info!(
        written = report.objects_written,
        present = report.objects_present,
        manifests = report.manifests_added.len(),
        "applied bundle"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn key(s: &str) -> ManifestKey {
        s.parse().unwrap()
    }

    fn everything(hive: &Hive, k: &ManifestKey) -> BTreeSet<ObjectId> {
        let root = manifest::load(hive, k).unwrap().root();
        hive_ops::required_objects(hive, &[root], &[]).unwrap()
    }

    #[test]
    fn bundle_moves_a_manifest_between_stores() {
        let (src, dst) = (Hive::in_memory(), Hive::in_memory());
        let k = hive_ops::import_bytes(&src, key("app:1"), "a.txt", b"hello", BTreeMap::new())
            .unwrap();
        let bytes = bundle_from_store(&src, &everything(&src, &k), &[k.clone()])
            .unwrap()
            .finish_to_bytes()
            .unwrap();

        let reader = BundleReader::from_bytes(bytes).unwrap();
        let report = apply_bundle(&dst, &reader).unwrap();
        assert_eq!(report.objects_written, 2);
        assert_eq!(report.manifests_added, vec![k.clone()]);
        assert!(hive_ops::copy::is_complete(&dst, &k).unwrap());

        let again = apply_bundle(&dst, &reader).unwrap();
        assert_eq!(again.objects_written, 0);
        assert_eq!(again.objects_present, 2);
        assert_eq!(again.manifests_skipped, vec![k]);
    }

    #[test]
    fn missing_object_cannot_be_bundled() {
        let hive = Hive::in_memory();
        let ghost: BTreeSet<_> = [ObjectId::from_bytes(b"ghost")].into();
        assert!(matches!(
            bundle_from_store(&hive, &ghost, &[]),
            Err(PackError::Ops(OpsError::ObjectNotFound(_)))
        ));
    }

    #[test]
    fn manifest_without_its_root_is_refused() {
        let src = Hive::in_memory();
        let k = hive_ops::import_bytes(&src, key("app:1"), "a.txt", b"x", BTreeMap::new())
            .unwrap();
        let bytes = bundle_from_store(&src, &BTreeSet::new(), &[k.clone()])
            .unwrap()
            .finish_to_bytes()
            .unwrap();
        let dst = Hive::in_memory();
        let err = apply_bundle(&dst, &BundleReader::from_bytes(bytes).unwrap()).unwrap_err();
        assert!(matches!(err, PackError::Ops(OpsError::ObjectNotFound(_))));
        assert!(!manifest::exists(&dst, &k).unwrap());
    }
}
