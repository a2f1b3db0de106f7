//! Comparing a manifest against files on disk.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use hive_model::EntryType;
use hive_types::{ManifestKey, ObjectId};
use hive_view::ElementPath;
use tracing::debug;

use crate::error::OpsResult;
use crate::hive::Hive;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum VerifyStatus {
    /// No regular file at the entry's path.
    Missing,
    /// The file's content hashes to a different id.
    Modified,
    Unmodified,
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Missing => "MISSING",
            Self::Modified => "MODIFIED",
            Self::Unmodified => "UNMODIFIED",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifyEntry {
    pub path: ElementPath,
    pub expected: ObjectId,
    pub status: VerifyStatus,
}

/// One entry per file of the manifest, in tree order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub entries: Vec<VerifyEntry>,
}

impl VerifyReport {
    pub fn count(&self, status: VerifyStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Whether every file matches.
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(|e| e.status == VerifyStatus::Unmodified)
    }
}

/// Classify every file of `key` against the directory `target` by content
/// hash. Files on disk that the manifest does not name are not reported.
pub fn verify(hive: &Hive, key: &ManifestKey, target: &Path) -> OpsResult<VerifyReport> {
    let view = hive.scanner().scan_manifest(key)?;
    let mut entries = Vec::new();
    let mut files: Vec<_> = view
        .iter()
        .map(|(_, element)| element)
        .filter(|element| element.entry_type == EntryType::Blob)
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));

    for element in files {
        let path = element.path.segments().iter().fold(target.to_path_buf(), |p, s| p.join(s));
        let status = match File::open(&path) {
            Ok(mut file) if path.is_file() => {
                if ObjectId::from_reader(&mut file)? == element.id {
                    VerifyStatus::Unmodified
                } else {
                    VerifyStatus::Modified
                }
            }
            Ok(_) => VerifyStatus::Missing,
            Err(e) if e.kind() == io::ErrorKind::NotFound => VerifyStatus::Missing,
            Err(e) => return Err(e.into()),
        };
        debug!(path = %element.path, %status, "verified file");
        entries.push(VerifyEntry {
            path: element.path.clone(),
            expected: element.id,
            status,
        });
    }
    Ok(VerifyReport { entries })
}
