//! Mark-and-sweep garbage collection.
//!
//! Prune runs inside a write scope. Objects stored at or after the start of
//! the oldest open scope are never collected: they may belong to an import
//! that has not written its manifest yet.

use std::collections::BTreeSet;

use hive_store::StoreResult;
use hive_types::ObjectId;
use tracing::{debug, info};

use crate::error::OpsResult;
use crate::hive::Hive;
use crate::required::{manifest_inventory, required_objects};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Objects reachable from some manifest.
    pub reachable: usize,
    /// Unreachable objects deleted, in id order.
    pub removed: Vec<ObjectId>,
    /// Unreachable objects kept because they are too recent.
    pub retained_recent: usize,
    pub bytes_freed: u64,
}

/// Delete every locally stored object no manifest reaches. Pooled objects
/// are left to pool reorganization.
pub fn prune(hive: &Hive) -> OpsResult<PruneReport> {
    let tx = hive.begin()?;
    let cutoff = hive.transactions().oldest_start();

    let roots: Vec<ObjectId> = manifest_inventory(hive, &[])?.into_values().collect();
    let reachable: BTreeSet<ObjectId> = required_objects(hive, &roots, &[])?;
    let stored: Vec<ObjectId> = hive
        .objects()
        .walk_all_objects()?
        .collect::<StoreResult<_>>()?;

    let mut report = PruneReport {
        reachable: reachable.len(),
        ..PruneReport::default()
    };
    let mut garbage: Vec<ObjectId> = stored
        .into_iter()
        .filter(|id| !reachable.contains(id))
        .collect();
    garbage.sort();

    for id in garbage {
        let stamp = hive.objects().object_timestamp(&id)?;
        if let (Some(stamp), Some(cutoff)) = (stamp, cutoff) {
            if stamp >= cutoff {
                debug!(id = %id.short_hex(), "keeping recent unreferenced object");
                report.retained_recent += 1;
                continue;
            }
        }
        let size = hive.objects().object_size(&id)?.unwrap_or(0);
        if hive.objects().remove_object(&id)? {
            report.bytes_freed += size;
            report.removed.push(id);
        }
    }

    hive.audit(
        "prune",
        format!("{} removed, {} bytes", report.removed.len(), report.bytes_freed),
    )?;
    tx.commit()?;
    info!(
        reachable = report.reachable,
        removed = report.removed.len(),
        retained = report.retained_recent,
        "prune finished"
    );
    Ok(report)
}
