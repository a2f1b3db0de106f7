use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{OpsError, OpsResult};

/// Name of the configuration file at the store root.
pub const CONFIG_FILE: &str = "hive.toml";

/// Per-store settings, read from `hive.toml` at the store root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// How long a write scope waits for the directory lock.
    pub lock_timeout_secs: u64,
    /// Content written into the lock file while the store is held.
    pub lock_owner: String,
    /// Sync object and manifest files before they are renamed into place.
    pub fsync: bool,
    /// Tags kept per MetaManifest record when a new value is written.
    pub meta_history: usize,
    /// Number of owners at which an object moves into the shared pool.
    pub pool_threshold: usize,
    /// User recorded in the audit log.
    pub audit_user: String,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 30,
            lock_owner: format!("pid:{}", std::process::id()),
            fsync: false,
            meta_history: 1,
            pool_threshold: 2,
            audit_user: std::env::var("USER").unwrap_or_else(|_| "hive".into()),
        }
    }
}

impl HiveConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Read `hive.toml` under `root`; defaults when the file does not exist.
    pub fn load(root: impl AsRef<Path>) -> OpsResult<Self> {
        let path = root.as_ref().join(CONFIG_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&text).map_err(|e| OpsError::Config(format!("{}: {e}", path.display())))
    }

    /// Write `hive.toml` under `root`, replacing any previous file atomically.
    pub fn save(&self, root: impl AsRef<Path>) -> OpsResult<()> {
        let root = root.as_ref();
        let text = toml::to_string_pretty(self).map_err(|e| OpsError::Config(e.to_string()))?;
        std::fs::create_dir_all(root)?;
        let mut staged = NamedTempFile::new_in(root)?;
        std::io::Write::write_all(&mut staged, text.as_bytes())?;
        staged
            .persist(root.join(CONFIG_FILE))
            .map_err(|e| OpsError::Io(e.error))?;
        Ok(())
    }
}
