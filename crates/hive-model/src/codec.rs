//! Byte-stable serialization of model values.
//!
//! Object ids are hashes over encoded bytes, so the encoding of a logical
//! value must never drift. Types with a registered [`ObjectCodec`] use it;
//! everything else falls back to compact JSON. A TOML mode is available for
//! records that humans edit (configuration files).
//!
//! The table is an ordinary value: build it once with
//! [`CodecTable::standard`] and pass it by reference.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use hive_types::ObjectId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ModelError, ModelResult};
use crate::tree::{EntryType, Tree, TreeBuilder, TreeKey};

/// A byte-exact encoder/decoder for one type.
pub trait ObjectCodec<T>: Send + Sync {
    fn encode(&self, value: &T) -> ModelResult<Vec<u8>>;
    fn decode(&self, data: &[u8]) -> ModelResult<T>;
}

/// Line-oriented tree encoding.
///
/// One line per entry, `TYPE|objectIdHex||name`, sorted by entry key, each
/// line terminated by `\n`, UTF-8. The third field is reserved and written
/// empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeCodec;

impl ObjectCodec<Tree> for TreeCodec {
    fn encode(&self, tree: &Tree) -> ModelResult<Vec<u8>> {
        let mut out = String::new();
        for (key, id) in tree.iter() {
            out.push_str(key.entry_type.as_str());
            out.push('|');
            out.push_str(&id.to_hex());
            out.push_str("||");
            out.push_str(&key.name);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    fn decode(&self, data: &[u8]) -> ModelResult<Tree> {
        let text = std::str::from_utf8(data)
            .map_err(|e| ModelError::Decoding(format!("tree is not UTF-8: {e}")))?;
        if !text.is_empty() && !text.ends_with('\n') {
            return Err(ModelError::MalformedTree {
                line: text.lines().count(),
                reason: "missing line terminator".into(),
            });
        }

        let mut builder = TreeBuilder::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let malformed = |reason: String| ModelError::MalformedTree {
                line: line_no,
                reason,
            };
            let mut fields = line.splitn(4, '|');
            let (Some(kind), Some(hex), Some(_reserved), Some(name)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                return Err(malformed("expected 4 fields".into()));
            };
            let entry_type: EntryType = kind.parse().map_err(|e| malformed(format!("{e}")))?;
            let id = ObjectId::from_hex(hex).map_err(|e| malformed(e.to_string()))?;
            builder.add(TreeKey::new(name, entry_type), id)?;
        }
        Ok(builder.build())
    }
}

/// Table mapping types to custom codecs, with a structured fallback.
pub struct CodecTable {
    codecs: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl CodecTable {
    /// A table with no custom codecs: everything is JSON.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// The table every store uses: [`TreeCodec`] for [`Tree`].
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register::<Tree, _>(TreeCodec);
        table
    }

    /// Register (or replace) the codec for `T`.
    pub fn register<T: 'static, C: ObjectCodec<T> + 'static>(&mut self, codec: C) {
        let boxed: Box<dyn ObjectCodec<T>> = Box::new(codec);
        self.codecs.insert(TypeId::of::<T>(), Box::new(boxed));
    }

    /// Whether `T` has a custom codec.
    pub fn has_codec<T: 'static>(&self) -> bool {
        self.codecs.contains_key(&TypeId::of::<T>())
    }

    fn lookup<T: 'static>(&self) -> Option<&dyn ObjectCodec<T>> {
        self.codecs
            .get(&TypeId::of::<T>())
            .and_then(|codec| codec.downcast_ref::<Box<dyn ObjectCodec<T>>>())
            .map(|codec| codec.as_ref())
    }

    /// Encode a value to the bytes its object id is computed over.
    pub fn to_bytes<T: Serialize + 'static>(&self, value: &T) -> ModelResult<Vec<u8>> {
        match self.lookup::<T>() {
            Some(codec) => codec.encode(value),
            None => serde_json::to_vec(value).map_err(|e| ModelError::Encoding(e.to_string())),
        }
    }

    /// Decode bytes produced by [`CodecTable::to_bytes`].
    pub fn from_bytes<T: DeserializeOwned + 'static>(&self, data: &[u8]) -> ModelResult<T> {
        match self.lookup::<T>() {
            Some(codec) => codec.decode(data),
            None => serde_json::from_slice(data).map_err(|e| ModelError::Decoding(e.to_string())),
        }
    }

    /// Encode a table-shaped value (struct or map) as TOML.
    pub fn to_human<T: Serialize>(&self, value: &T) -> ModelResult<String> {
        toml::to_string_pretty(value).map_err(|e| ModelError::Encoding(e.to_string()))
    }

    /// Decode a TOML document.
    pub fn from_human<T: DeserializeOwned>(&self, text: &str) -> ModelResult<T> {
        toml::from_str(text).map_err(|e| ModelError::Decoding(e.to_string()))
    }
}

impl Default for CodecTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for CodecTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecTable")
            .field("custom_codecs", &self.codecs.len())
            .finish()
    }
}
