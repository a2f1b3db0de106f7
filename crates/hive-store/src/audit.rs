use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Name of the audit log file inside the log directory.
pub const AUDIT_FILE: &str = "audit.log";

/// One mutating operation recorded in the audit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub operation: String,
    pub detail: String,
}

/// Append-only JSON-lines activity log of a store.
pub struct AuditLog {
    path: PathBuf,
    user: String,
    file: Mutex<File>,
}

impl AuditLog {
    /// Open (or create) `dir/audit.log`, attributing entries to `user`.
    pub fn open(dir: impl AsRef<Path>, user: impl Into<String>) -> StoreResult<Self> {
        fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(AUDIT_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            user: user.into(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry stamped with the current time.
    pub fn record(&self, operation: &str, detail: impl Into<String>) -> StoreResult<()> {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            user: self.user.clone(),
            operation: operation.to_string(),
            detail: detail.into(),
        };
        let mut line =
            serde_json::to_vec(&entry).map_err(|e| StoreError::Serialization(e.to_string()))?;
        line.push(b'\n');
        let mut file = self.file.lock().expect("lock poisoned");
        file.write_all(&line)?;
        Ok(())
    }

    /// Every entry written so far, oldest first. Torn trailing lines from a
    /// crash are skipped.
    pub fn entries(&self) -> StoreResult<Vec<AuditEntry>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(entry) = serde_json::from_str(&line) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("path", &self.path)
            .field("user", &self.user)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_are_appended_in_order() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::open(tmp.path().join("logs"), "alice").unwrap();
        log.record("import", "app:1").unwrap();
        log.record("prune", "removed 3 objects").unwrap();

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].operation, "import");
        assert_eq!(entries[1].detail, "removed 3 objects");
        assert!(entries.iter().all(|e| e.user == "alice"));
        assert!(entries[0].timestamp <= entries[1].timestamp);
    }

    #[test]
    fn reopen_keeps_history_and_skips_torn_lines() {
        let tmp = TempDir::new().unwrap();
        {
            let log = AuditLog::open(tmp.path(), "bob").unwrap();
            log.record("delete", "app:1").unwrap();
        }
        let mut raw = OpenOptions::new()
            .append(true)
            .open(tmp.path().join(AUDIT_FILE))
            .unwrap();
        raw.write_all(b"{\"timestamp\":").unwrap();

        let log = AuditLog::open(tmp.path(), "bob").unwrap();
        assert_eq!(log.entries().unwrap().len(), 1);
    }
}
