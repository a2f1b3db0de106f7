//! Materializing a manifest onto the filesystem.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

use hive_model::EntryType;
use hive_types::{ManifestKey, ObjectId, ObjectIdHasher};
use hive_view::ViewKind;
use tracing::info;

use crate::error::{OpsError, OpsResult};
use crate::hive::Hive;

/// What an export wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Write the tree of `key` under `target`, creating directories as needed
/// and overwriting files that already exist. Referenced manifests are
/// expanded in place.
///
/// Nothing is written unless the whole tree is present. Blobs are hashed
/// while they are copied; a damaged one is removed again and fails the
/// export.
pub fn export(hive: &Hive, key: &ManifestKey, target: &Path) -> OpsResult<ExportReport> {
    let view = hive.scanner().scan_manifest(key)?;
    let unavailable = view.missing().count() + view.skipped().count() + view.dangling_refs().count();
    if unavailable > 0 {
        return Err(OpsError::Incomplete {
            context: format!("export of {key}"),
            count: unavailable,
        });
    }

    let mut report = ExportReport::default();
    fs::create_dir_all(target)?;
    // Arena order is breadth-first, so parents are created before children.
    for (_, element) in view.iter() {
        let path = element.path.segments().iter().fold(target.to_path_buf(), |p, s| p.join(s));
        match (&element.kind, element.entry_type) {
            (ViewKind::Tree { .. }, _) if !element.path.is_root() => {
                fs::create_dir_all(&path)?;
                report.directories += 1;
            }
            (ViewKind::ManifestRef { .. }, _) => fs::create_dir_all(&path)?,
            (ViewKind::Blob, EntryType::Blob) => {
                report.bytes += copy_verified(hive, &element.id, &path)?;
                report.files += 1;
            }
            _ => {}
        }
    }
    info!(%key, target = %target.display(), files = report.files, "exported manifest");
    Ok(report)
}

fn copy_verified(hive: &Hive, id: &ObjectId, path: &Path) -> OpsResult<u64> {
    let mut stream = hive.objects().get_stream(id)?;
    let mut file = File::create(path)?;
    let mut hasher = ObjectIdHasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])?;
    }
    let actual = hasher.finish();
    if actual != *id {
        drop(file);
        fs::remove_file(path)?;
        return Err(OpsError::Damaged { id: *id, actual });
    }
    Ok(hasher.len())
}
