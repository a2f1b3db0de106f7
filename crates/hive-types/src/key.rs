use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identity of a manifest: a `name` and a `tag` (the version component).
///
/// The textual form is `name:tag`. Names may be hierarchical (`app/web`) but
/// never contain a colon, so parsing splits at the first colon. Tags never
/// contain a slash. Keys order by name, then tag.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawKey", into = "RawKey")]
pub struct ManifestKey {
    name: String,
    tag: String,
}

impl ManifestKey {
    /// Create a validated key.
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        let tag = tag.into();
        validate(&name, &tag)?;
        Ok(Self { name, tag })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The tag parsed as a number, for auto-incrementing version tags.
    pub fn numeric_tag(&self) -> Option<u64> {
        self.tag.parse().ok()
    }

    /// Same name, different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Self, TypeError> {
        Self::new(self.name.clone(), tag)
    }
}

fn validate(name: &str, tag: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidKey {
        key: format!("{name}:{tag}"),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("empty name"));
    }
    if tag.is_empty() {
        return Err(invalid("empty tag"));
    }
    if name.contains(':') {
        return Err(invalid("name contains ':'"));
    }
    if tag.contains('/') {
        return Err(invalid("tag contains '/'"));
    }
    if name.contains(['\n', '\r']) || tag.contains(['\n', '\r']) {
        return Err(invalid("line break in key"));
    }
    if name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(invalid("empty or relative name segment"));
    }
    if tag == "." || tag == ".." {
        return Err(invalid("relative tag"));
    }
    Ok(())
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

impl FromStr for ManifestKey {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, tag) = s.split_once(':').ok_or_else(|| TypeError::InvalidKey {
            key: s.to_string(),
            reason: "missing ':' separator".into(),
        })?;
        Self::new(name, tag)
    }
}

#[derive(Serialize, Deserialize)]
struct RawKey {
    name: String,
    tag: String,
}

impl TryFrom<RawKey> for ManifestKey {
    type Error = TypeError;

    fn try_from(raw: RawKey) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.tag)
    }
}

impl From<ManifestKey> for RawKey {
    fn from(key: ManifestKey) -> Self {
        Self {
            name: key.name,
            tag: key.tag,
        }
    }
}
