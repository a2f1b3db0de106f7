//! Metadata records attached to manifests.
//!
//! A [`MetaManifest`] stores a typed value as an ordinary manifest under the
//! reserved `.meta/` namespace, bound either to an owner's name (shared by
//! every tag) or to one owner key. Each write allocates the next numeric
//! tag and drops tags beyond the configured history, so with the default
//! history of one a write supersedes the previous record.
//!
//! Record names:
//!
//! ```text
//! shared   .meta/shared/<meta>/<owner name>
//! per tag  .meta/tagged/<meta>/<owner name>/<escaped owner tag>
//! ```
//!
//! The tag segment is percent-escaped: `%` and `:` always, and the `.` of a
//! trailing `.mf` so the segment never looks like a manifest file.

use std::io::Read;
use std::marker::PhantomData;

use hive_model::{Manifest, TreeBuilder};
use hive_types::{ManifestKey, TypeError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{OpsError, OpsResult};
use crate::hive::Hive;
use crate::manifest;

/// Name prefix of every metadata record.
pub const META_PREFIX: &str = ".meta/";
const VALUE_ENTRY: &str = "value";
const OWNER_LABEL: &str = "meta.owner";
const BINDING_LABEL: &str = "meta.binding";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetaBinding {
    /// One record per owner name; alive while any tag of the name exists.
    Shared,
    /// One record per owner key; alive while that key exists.
    PerTag,
}

impl MetaBinding {
    fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::PerTag => "tagged",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "shared" => Some(Self::Shared),
            "tagged" => Some(Self::PerTag),
            _ => None,
        }
    }
}

/// A typed metadata record kind, identified by `name`.
#[derive(Clone, Debug)]
pub struct MetaManifest<T> {
    name: String,
    binding: MetaBinding,
    _value: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + 'static> MetaManifest<T> {
    pub fn shared(name: impl Into<String>) -> OpsResult<Self> {
        Self::new(name.into(), MetaBinding::Shared)
    }

    pub fn per_tag(name: impl Into<String>) -> OpsResult<Self> {
        Self::new(name.into(), MetaBinding::PerTag)
    }

    fn new(name: String, binding: MetaBinding) -> OpsResult<Self> {
        if name.is_empty() || name.contains(['/', ':', '\n', '\r']) || name == "." || name == ".." {
            return Err(TypeError::InvalidKey {
                key: name,
                reason: "meta name must be a single plain segment".into(),
            }
            .into());
        }
        Ok(Self {
            name,
            binding,
            _value: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> MetaBinding {
        self.binding
    }

    /// Manifest name holding this record for `owner`.
    pub fn record_name(&self, owner: &ManifestKey) -> String {
        let base = format!("{META_PREFIX}{}/{}/{}", self.binding.as_str(), self.name, owner.name());
        match self.binding {
            MetaBinding::Shared => base,
            MetaBinding::PerTag => format!("{base}/{}", escape_tag(owner.tag())),
        }
    }

    /// Store `value` for `owner`, which must be alive. Returns the key of
    /// the new record.
    pub fn write(&self, hive: &Hive, owner: &ManifestKey, value: &T) -> OpsResult<ManifestKey> {
        let tx = hive.begin()?;
        if !is_alive(hive, owner, self.binding)? {
            return Err(OpsError::ManifestNotFound(owner.clone()));
        }
        let record = self.record_name(owner);
        let key = manifest::next_key(hive, &record)?;

        let blob = hive.objects().add_object(&hive.codecs().to_bytes(value)?)?;
        let mut tree = TreeBuilder::new();
        tree.add_blob(VALUE_ENTRY, blob)?;
        let root = hive.add_tree(&tree.build())?;
        let record_manifest = Manifest::builder(key.clone())
            .root(root)
            .label(OWNER_LABEL, owner.to_string())
            .label(BINDING_LABEL, self.binding.as_str())
            .build()?;
        hive.manifests().add_manifest(&record_manifest)?;

        let keep = hive.config().meta_history.max(1);
        let superseded = manifest::delete_old_by_id(hive, &record, keep)?;
        hive.audit("meta-write", key.to_string())?;
        tx.commit()?;
        debug!(%key, superseded = superseded.len(), "wrote meta record");
        Ok(key)
    }

    /// Latest value for `owner`.
    pub fn read(&self, hive: &Hive, owner: &ManifestKey) -> OpsResult<Option<T>> {
        let record = self.record_name(owner);
        let Some(id) = manifest::max_id(hive, &record)? else {
            return Ok(None);
        };
        let key = ManifestKey::new(record, id.to_string())?;
        let Some(record_manifest) = hive.manifests().get_manifest(&key)? else {
            return Ok(None);
        };
        let tree = hive.load_tree(&record_manifest.root())?;
        let (_, blob) = tree.get(VALUE_ENTRY).ok_or_else(|| OpsError::EntryNotFound {
            key: key.clone(),
            path: VALUE_ENTRY.into(),
        })?;
        let mut bytes = Vec::new();
        hive.objects().get_stream(blob)?.read_to_end(&mut bytes)?;
        Ok(Some(hive.codecs().from_bytes(&bytes)?))
    }

    /// Retained record keys for `owner`, oldest first.
    pub fn history(&self, hive: &Hive, owner: &ManifestKey) -> OpsResult<Vec<ManifestKey>> {
        let mut keys: Vec<(u64, ManifestKey)> = manifest::list_tags(hive, &self.record_name(owner))?
            .into_iter()
            .filter_map(|key| key.numeric_tag().map(|id| (id, key)))
            .collect();
        keys.sort();
        Ok(keys.into_iter().map(|(_, key)| key).collect())
    }

    /// Remove every record for `owner`. Returns how many were removed.
    pub fn delete(&self, hive: &Hive, owner: &ManifestKey) -> OpsResult<usize> {
        let _tx = hive.begin()?;
        let mut removed = 0;
        for key in manifest::list_tags(hive, &self.record_name(owner))? {
            if hive.manifests().remove_manifest(&key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn is_parent_alive(&self, hive: &Hive, owner: &ManifestKey) -> OpsResult<bool> {
        is_alive(hive, owner, self.binding)
    }
}

fn escape_tag(tag: &str) -> String {
    let mut escaped = tag.replace('%', "%25").replace(':', "%3A");
    if escaped.ends_with(".mf") {
        let dot = escaped.len() - 3;
        escaped.replace_range(dot..dot + 1, "%2E");
    }
    escaped
}

fn is_alive(hive: &Hive, owner: &ManifestKey, binding: MetaBinding) -> OpsResult<bool> {
    match binding {
        MetaBinding::PerTag => Ok(hive.manifests().has_manifest(owner)?),
        MetaBinding::Shared => Ok(!manifest::list_tags(hive, owner.name())?.is_empty()),
    }
}

/// Remove every metadata record whose owner no longer exists. Returns the
/// removed keys.
pub fn cleanup_dead_metas(hive: &Hive) -> OpsResult<Vec<ManifestKey>> {
    let _tx = hive.begin()?;
    let mut removed = Vec::new();
    for key in hive.manifests().list_manifests(META_PREFIX)? {
        let Some(record) = hive.manifests().get_manifest(&key)? else {
            continue;
        };
        let owner = record.label(OWNER_LABEL).and_then(|o| o.parse::<ManifestKey>().ok());
        let binding = record.label(BINDING_LABEL).and_then(MetaBinding::parse);
        let (Some(owner), Some(binding)) = (owner, binding) else {
            warn!(%key, "meta record without owner labels");
            continue;
        };
        if !is_alive(hive, &owner, binding)? && hive.manifests().remove_manifest(&key)? {
            removed.push(key);
        }
    }
    if !removed.is_empty() {
        hive.audit("meta-cleanup", format!("{} record(s) removed", removed.len()))?;
        info!(removed = removed.len(), "removed dead meta records");
    }
    Ok(removed)
}
