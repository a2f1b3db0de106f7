//! Push and fetch between a local store and a remote.
//!
//! Both directions negotiate by hash before moving anything: the sender
//! computes the object closure of the manifests being moved, the receiver's
//! holdings are subtracted from it, and one bundle carries the remainder
//! plus the manifest records. Manifests referenced from moved trees travel
//! with them.

use std::collections::BTreeSet;

use hive_ops::scan::{manifest_closure, manifest_refs};
use hive_ops::Hive;
use hive_pack::{apply_bundle, bundle_from_store, BundleReader};
use hive_types::{ManifestKey, ObjectId};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteStore;
use crate::types::{FetchReport, PushReport};

/// Send `keys`, the manifests they reference, and whatever objects the
/// remote lacks for them.
pub async fn push(
    local: &Hive,
    remote: &dyn RemoteStore,
    keys: &[ManifestKey],
) -> SyncResult<PushReport> {
    let closure = manifest_closure(local, keys)?;
    let names: BTreeSet<&str> = closure.iter().map(ManifestKey::name).collect();
    let filters: Vec<String> = names.into_iter().map(str::to_string).collect();
    let inventory = remote.get_manifest_inventory(&filters).await?;

    let mut report = PushReport::default();
    let mut to_send = Vec::new();
    let mut roots = Vec::new();
    for key in &closure {
        if inventory.contains_key(key) {
            report.manifests_present.push(key.clone());
            continue;
        }
        // Dangling references stay dangling on the remote as well.
        if let Some(m) = local.manifests().get_manifest(key)? {
            roots.push(m.root());
            to_send.push(key.clone());
        }
    }
    if to_send.is_empty() {
        info!(remote = remote.address(), "remote is up to date");
        return Ok(report);
    }

    let required = hive_ops::required_objects(local, &roots, &[])?;
    let reported = remote.get_missing_objects(&required).await?;
    let wanted: BTreeSet<ObjectId> = reported.intersection(&required).copied().collect();
    if wanted.len() < reported.len() {
        warn!(
            remote = remote.address(),
            unrequested = reported.len() - wanted.len(),
            "remote reported objects outside the push"
        );
    }
    let unavailable = hive_ops::missing_objects(local, &wanted)?;
    if !unavailable.is_empty() {
        return Err(SyncError::Incomplete {
            context: format!("push to {}", remote.address()),
            count: unavailable.len(),
        });
    }
    debug!(
        required = required.len(),
        wanted = wanted.len(),
        "negotiated push"
    );

    let bytes = bundle_from_store(local, &wanted, &to_send)?.finish_to_bytes()?;
    report.bytes_transferred = bytes.len() as u64;
    let applied = remote.push(BundleReader::from_bytes(bytes)?).await?;

    report.objects_sent = wanted.len();
    report.objects_skipped = required.len() - wanted.len();
    report.manifests_sent = applied.manifests_added;
    report.manifests_present.extend(applied.manifests_skipped);
    info!(
        remote = remote.address(),
        objects = report.objects_sent,
        skipped = report.objects_skipped,
        manifests = report.manifests_sent.len(),
        bytes = report.bytes_transferred,
        "push finished"
    );
    Ok(report)
}

/// Receive `keys` and the manifests they reference, transferring only the
/// objects this store lacks.
pub async fn fetch(
    local: &Hive,
    remote: &dyn RemoteStore,
    keys: &[ManifestKey],
) -> SyncResult<FetchReport> {
    let inventory = remote.get_manifest_inventory(&[]).await?;
    if let Some(absent) = keys.iter().find(|k| !inventory.contains_key(*k)) {
        return Err(SyncError::ManifestNotFound(absent.clone()));
    }

    let mut report = FetchReport::default();
    let mut visited = BTreeSet::new();
    let mut pending: BTreeSet<ManifestKey> = keys.iter().cloned().collect();

    // One round per level of manifest references.
    while !pending.is_empty() {
        let mut wanted = Vec::new();
        let mut roots: Vec<ObjectId> = Vec::new();
        for key in std::mem::take(&mut pending) {
            if !visited.insert(key.clone()) {
                continue;
            }
            if local.manifests().has_manifest(&key)? {
                report.manifests_present.push(key);
                continue;
            }
            if let Some(root) = inventory.get(&key) {
                roots.push(*root);
                wanted.push(key);
            }
        }
        if wanted.is_empty() {
            break;
        }

        let required = remote.get_required_objects(&roots, &[]).await?;
        let missing = hive_ops::missing_objects(local, &required)?;
        let bytes = remote.fetch(&missing, &wanted).await?;
        report.bytes_transferred += bytes.len() as u64;
        let applied = apply_bundle(local, &BundleReader::from_bytes(bytes)?)?;
        report.objects_received += applied.objects_written;
        report.objects_skipped += required.len() - missing.len() + applied.objects_present;
        report.manifests_received.extend(applied.manifests_added);
        report.manifests_present.extend(applied.manifests_skipped);

        for root in roots {
            for referenced in manifest_refs(local, root)? {
                if !visited.contains(&referenced) && inventory.contains_key(&referenced) {
                    pending.insert(referenced);
                }
            }
        }
    }

    info!(
        remote = remote.address(),
        objects = report.objects_received,
        skipped = report.objects_skipped,
        manifests = report.manifests_received.len(),
        bytes = report.bytes_transferred,
        "fetch finished"
    );
    Ok(report)
}
