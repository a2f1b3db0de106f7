use std::collections::BTreeMap;

use hive_types::{ManifestKey, ObjectId};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A named, tagged, immutable pointer to a root tree plus labels.
///
/// Labels live in a `BTreeMap` so the structured encoding is byte-stable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    key: ManifestKey,
    root: ObjectId,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl Manifest {
    pub fn builder(key: ManifestKey) -> ManifestBuilder {
        ManifestBuilder::new(key)
    }

    pub fn key(&self) -> &ManifestKey {
        &self.key
    }

    /// Id of the root tree.
    pub fn root(&self) -> ObjectId {
        self.root
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Builder for [`Manifest`]. A root tree is mandatory.
#[derive(Clone, Debug)]
pub struct ManifestBuilder {
    key: ManifestKey,
    root: Option<ObjectId>,
    labels: BTreeMap<String, String>,
}

impl ManifestBuilder {
    pub fn new(key: ManifestKey) -> Self {
        Self {
            key,
            root: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn root(mut self, root: ObjectId) -> Self {
        self.root = Some(root);
        self
    }

    pub fn label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn build(self) -> ModelResult<Manifest> {
        let root = self
            .root
            .ok_or_else(|| ModelError::MissingRoot(self.key.to_string()))?;
        Ok(Manifest {
            key: self.key,
            root,
            labels: self.labels,
        })
    }
}

/// Content of the object a MANIFEST tree entry points to.
///
/// The object only names the referenced manifest; the referenced manifest's
/// root is resolved through the manifest database when the tree is scanned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRef {
    pub key: ManifestKey,
}

impl ManifestRef {
    pub fn new(key: ManifestKey) -> Self {
        Self { key }
    }

    /// Bytes stored as the reference object.
    pub fn encode(&self) -> ModelResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ModelError::Encoding(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> ModelResult<Self> {
        serde_json::from_slice(data).map_err(|e| ModelError::Decoding(e.to_string()))
    }
}
