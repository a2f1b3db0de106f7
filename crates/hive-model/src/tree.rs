use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use hive_types::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// The kind of object a tree entry points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryType {
    /// Raw file content.
    Blob,
    /// A nested tree.
    Tree,
    /// A manifest reference object naming another manifest's key.
    Manifest,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "BLOB",
            Self::Tree => "TREE",
            Self::Manifest => "MANIFEST",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BLOB" => Ok(Self::Blob),
            "TREE" => Ok(Self::Tree),
            "MANIFEST" => Ok(Self::Manifest),
            other => Err(ModelError::Decoding(format!("unknown entry type {other}"))),
        }
    }
}

/// Key of a tree entry: name plus entry type. Orders by name first.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeKey {
    pub name: String,
    pub entry_type: EntryType,
}

impl TreeKey {
    pub fn new(name: impl Into<String>, entry_type: EntryType) -> Self {
        Self {
            name: name.into(),
            entry_type,
        }
    }
}

/// Flat form of a single tree entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub id: ObjectId,
}

/// Immutable, sorted mapping from [`TreeKey`] to [`ObjectId`].
///
/// No two entries share a name. Build one with [`TreeBuilder`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TreeEntry>", into = "Vec<TreeEntry>")]
pub struct Tree {
    entries: BTreeMap<TreeKey, ObjectId>,
}

impl Tree {
    /// Create an empty tree.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up an entry by name, whatever its type.
    pub fn get(&self, name: &str) -> Option<(&TreeKey, &ObjectId)> {
        // Entries sort by name first, so the first key >= (name, Blob) is the
        // only candidate.
        self.entries
            .range(TreeKey::new(name, EntryType::Blob)..)
            .next()
            .filter(|(key, _)| key.name == name)
    }

    /// Iterate entries in persisted order.
    pub fn iter(&self) -> impl Iterator<Item = (&TreeKey, &ObjectId)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Start a builder pre-populated with this tree's entries.
    pub fn to_builder(&self) -> TreeBuilder {
        let mut builder = TreeBuilder::new();
        for (key, id) in &self.entries {
            builder.names.insert(key.name.clone(), (key.entry_type, *id));
        }
        builder
    }
}

impl TryFrom<Vec<TreeEntry>> for Tree {
    type Error = ModelError;

    fn try_from(entries: Vec<TreeEntry>) -> Result<Self, Self::Error> {
        let mut builder = TreeBuilder::new();
        for entry in entries {
            builder.add(TreeKey::new(entry.name, entry.entry_type), entry.id)?;
        }
        Ok(builder.build())
    }
}

impl From<Tree> for Vec<TreeEntry> {
    fn from(tree: Tree) -> Self {
        tree.entries
            .into_iter()
            .map(|(key, id)| TreeEntry {
                name: key.name,
                entry_type: key.entry_type,
                id,
            })
            .collect()
    }
}

/// Builder enforcing tree invariants.
#[derive(Clone, Debug, Default)]
pub struct TreeBuilder {
    names: BTreeMap<String, (EntryType, ObjectId)>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. Fails if the name is already taken by any entry type.
    pub fn add(&mut self, key: TreeKey, id: ObjectId) -> ModelResult<&mut Self> {
        validate_entry_name(&key.name)?;
        if self.names.contains_key(&key.name) {
            return Err(ModelError::DuplicateEntry(key.name));
        }
        self.names.insert(key.name, (key.entry_type, id));
        Ok(self)
    }

    pub fn add_blob(&mut self, name: impl Into<String>, id: ObjectId) -> ModelResult<&mut Self> {
        self.add(TreeKey::new(name, EntryType::Blob), id)
    }

    pub fn add_tree(&mut self, name: impl Into<String>, id: ObjectId) -> ModelResult<&mut Self> {
        self.add(TreeKey::new(name, EntryType::Tree), id)
    }

    pub fn add_manifest_ref(
        &mut self,
        name: impl Into<String>,
        id: ObjectId,
    ) -> ModelResult<&mut Self> {
        self.add(TreeKey::new(name, EntryType::Manifest), id)
    }

    /// Remove an entry by name, returning what it pointed to.
    pub fn remove(&mut self, name: &str) -> Option<(EntryType, ObjectId)> {
        self.names.remove(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn build(self) -> Tree {
        let entries = self
            .names
            .into_iter()
            .map(|(name, (entry_type, id))| (TreeKey { name, entry_type }, id))
            .collect();
        Tree { entries }
    }
}

fn validate_entry_name(name: &str) -> ModelResult<()> {
    let invalid = |reason: &str| ModelError::InvalidEntryName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if name == "." || name == ".." {
        return Err(invalid("relative name"));
    }
    if name.contains('/') {
        return Err(invalid("contains '/'"));
    }
    if name.contains(['\n', '\r']) {
        return Err(invalid("contains a line break"));
    }
    Ok(())
}
