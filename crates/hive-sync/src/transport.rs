//! Resolving remote addresses to endpoints.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use hive_ops::Hive;
use tracing::debug;

use crate::archive::ArchiveRemote;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalRemote;
use crate::remote::RemoteStore;

/// Scheme of a store directory on this machine.
pub const FILE_SCHEME: &str = "file";
/// Scheme of a bundle file used as a store.
pub const ARCHIVE_SCHEME: &str = "jar";

/// A parsed remote address: `scheme:location`.
///
/// An address without a scheme is a local path. A single letter before the
/// colon is read as a drive letter, not a scheme.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteAddress {
    pub scheme: String,
    pub location: String,
}

impl RemoteAddress {
    /// Location as a filesystem path, for `file:` and `jar:` addresses.
    /// `file://` prefixes are accepted in both.
    pub fn path(&self) -> PathBuf {
        let location = self.location.strip_prefix("file:").unwrap_or(&self.location);
        PathBuf::from(location.strip_prefix("//").unwrap_or(location))
    }
}

impl FromStr for RemoteAddress {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(SyncError::InvalidAddress("empty address".into()));
        }
        let scheme_end = s.find(':').filter(|&end| {
            end > 1
                && s[..end]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        });
        Ok(match scheme_end {
            Some(end) => Self {
                scheme: s[..end].to_ascii_lowercase(),
                location: s[end + 1..].to_string(),
            },
            None => Self {
                scheme: FILE_SCHEME.to_string(),
                location: s.to_string(),
            },
        })
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.location)
    }
}

/// Opens endpoints for one scheme.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, address: &RemoteAddress) -> SyncResult<Arc<dyn RemoteStore>>;
}

struct FileConnector;

#[async_trait]
impl RemoteConnector for FileConnector {
    async fn connect(&self, address: &RemoteAddress) -> SyncResult<Arc<dyn RemoteStore>> {
        let path = address.path();
        let hive = tokio::task::spawn_blocking(move || Hive::open(path))
            .await
            .map_err(|e| SyncError::Remote(format!("open task failed: {e}")))??;
        Ok(Arc::new(
            LocalRemote::new(Arc::new(hive)).with_address(address.to_string()),
        ))
    }
}

struct ArchiveConnector;

#[async_trait]
impl RemoteConnector for ArchiveConnector {
    async fn connect(&self, address: &RemoteAddress) -> SyncResult<Arc<dyn RemoteStore>> {
        let path = address.path();
        let archive = tokio::task::spawn_blocking(move || ArchiveRemote::open(path))
            .await
            .map_err(|e| SyncError::Remote(format!("open task failed: {e}")))??;
        Ok(Arc::new(archive))
    }
}

/// Scheme to connector table.
///
/// [`TransportRegistry::standard`] knows `file:` and `jar:`; networked
/// endpoints are added with [`TransportRegistry::register`]. Any other
/// scheme fails with [`SyncError::UnsupportedScheme`] before anything is
/// opened.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    connectors: BTreeMap<String, Arc<dyn RemoteConnector>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(FILE_SCHEME, FileConnector);
        registry.register(ARCHIVE_SCHEME, ArchiveConnector);
        registry
    }

    /// Add or replace the connector for `scheme`.
    pub fn register(&mut self, scheme: &str, connector: impl RemoteConnector + 'static) {
        self.connectors
            .insert(scheme.to_ascii_lowercase(), Arc::new(connector));
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.connectors.keys().map(String::as_str)
    }

    pub async fn connect(&self, address: &str) -> SyncResult<Arc<dyn RemoteStore>> {
        let address: RemoteAddress = address.parse()?;
        let connector = self
            .connectors
            .get(&address.scheme)
            .ok_or_else(|| SyncError::UnsupportedScheme(address.scheme.clone()))?;
        debug!(%address, "connecting");
        connector.connect(&address).await
    }
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportRegistry")
            .field("schemes", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}
