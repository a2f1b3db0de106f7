use std::io::Read;
use std::path::Path;

use hive_model::Manifest;
use hive_types::ObjectId;
use tracing::debug;

use crate::entry::EntryKind;
use crate::error::{PackError, PackResult};
use crate::index::BundleIndex;
use crate::writer::{decode_varint, BUNDLE_MAGIC, BUNDLE_VERSION, HEADER_LEN, TRAILER_LEN};

/// A validated bundle held in memory.
///
/// Opening checks the header and the trailer checksum and walks every entry
/// once to index objects and collect manifest offsets. Object payloads are
/// decompressed lazily, each read re-checking its CRC32, length and hash.
#[derive(Debug)]
pub struct BundleReader {
    data: Vec<u8>,
    index: BundleIndex,
    manifest_offsets: Vec<u64>,
    checksum: [u8; 32],
}

/// Entry header as parsed at an offset.
struct RawEntry<'a> {
    kind: EntryKind,
    id: Option<ObjectId>,
    raw_len: u64,
    payload: &'a [u8],
    crc32: u32,
    /// Offset of the entry that follows.
    next: usize,
}

impl BundleReader {
    pub fn open(path: &Path) -> PackResult<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn from_reader(reader: &mut dyn Read) -> PackResult<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(data: Vec<u8>) -> PackResult<Self> {
        if data.len() < HEADER_LEN + TRAILER_LEN {
            return Err(PackError::CorruptEntry {
                offset: 0,
                reason: format!("bundle too short: {} bytes", data.len()),
            });
        }
        if &data[..4] != BUNDLE_MAGIC {
            return Err(PackError::InvalidMagic {
                expected: String::from_utf8_lossy(BUNDLE_MAGIC).into_owned(),
                actual: String::from_utf8_lossy(&data[..4]).into_owned(),
            });
        }
        let version = read_u32(&data, 4);
        if version != BUNDLE_VERSION {
            return Err(PackError::UnsupportedVersion(version));
        }

        let body_end = data.len() - TRAILER_LEN;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&data[body_end..]);
        if blake3::hash(&data[..body_end]).as_bytes() != &checksum {
            return Err(PackError::ChecksumMismatch);
        }

        let count = read_u32(&data, 8) as usize;
        let mut objects = Vec::new();
        let mut manifest_offsets = Vec::new();
        let mut offset = HEADER_LEN;
        for _ in 0..count {
            let entry = parse_entry(&data[..body_end], offset)?;
            match (entry.kind, entry.id) {
                (EntryKind::Object, Some(id)) => objects.push((id, entry.crc32, offset as u64)),
                _ => manifest_offsets.push(offset as u64),
            }
            offset = entry.next;
        }
        if offset != body_end {
            return Err(PackError::CorruptEntry {
                offset: offset as u64,
                reason: format!("{} trailing bytes after the last entry", body_end - offset),
            });
        }

        let index = BundleIndex::build(objects);
        debug!(
            objects = index.object_count(),
            manifests = manifest_offsets.len(),
            "opened bundle"
        );
        Ok(Self {
            data,
            index,
            manifest_offsets,
            checksum,
        })
    }

    /// Decompress and verify one object. `Ok(None)` if the bundle lacks it.
    pub fn read_object(&self, id: &ObjectId) -> PackResult<Option<Vec<u8>>> {
        let Some((offset, _)) = self.index.lookup(id) else {
            return Ok(None);
        };
        let entry = parse_entry(self.body(), offset as usize)?;
        let data = decompress(&entry, offset)?;
        let actual = ObjectId::from_bytes(&data);
        if actual != *id {
            return Err(PackError::HashMismatch {
                expected: *id,
                actual,
            });
        }
        Ok(Some(data))
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    /// Object ids in ascending order.
    pub fn object_ids(&self) -> &[ObjectId] {
        &self.index.object_ids
    }

    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    pub fn manifest_count(&self) -> usize {
        self.manifest_offsets.len()
    }

    /// Every manifest record, in bundle order.
    pub fn manifests(&self) -> PackResult<Vec<Manifest>> {
        self.manifest_offsets
            .iter()
            .map(|&offset| {
                let entry = parse_entry(self.body(), offset as usize)?;
                let json = decompress(&entry, offset)?;
                serde_json::from_slice(&json).map_err(|e| PackError::Serialization(e.to_string()))
            })
            .collect()
    }

    /// BLAKE3 checksum from the trailer.
    pub fn checksum(&self) -> &[u8; 32] {
        &self.checksum
    }

    pub fn index(&self) -> &BundleIndex {
        &self.index
    }

    fn body(&self) -> &[u8] {
        &self.data[..self.data.len() - TRAILER_LEN]
    }
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn parse_entry(body: &[u8], offset: usize) -> PackResult<RawEntry<'_>> {
    let corrupt = |reason: &str| PackError::CorruptEntry {
        offset: offset as u64,
        reason: reason.to_string(),
    };
    let mut pos = offset;
    let type_byte = *body.get(pos).ok_or_else(|| corrupt("truncated entry"))?;
    let kind = EntryKind::from_type_byte(type_byte)
        .ok_or_else(|| corrupt(&format!("unknown entry type {type_byte}")))?;
    pos += 1;

    let id = match kind {
        EntryKind::Object => {
            let bytes = body.get(pos..pos + 32).ok_or_else(|| corrupt("truncated id"))?;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(bytes);
            pos += 32;
            Some(ObjectId::from_hash(hash))
        }
        EntryKind::Manifest => None,
    };

    let (raw_len, used) = decode_varint(&body[pos..]).map_err(corrupt)?;
    pos += used;
    let (compressed_len, used) = decode_varint(&body[pos..]).map_err(corrupt)?;
    pos += used;

    let payload_end = usize::try_from(compressed_len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|&end| end + 4 <= body.len())
        .ok_or_else(|| corrupt("payload runs past the end of the bundle"))?;
    let payload = &body[pos..payload_end];
    let crc32 = read_u32(body, payload_end);

    Ok(RawEntry {
        kind,
        id,
        raw_len,
        payload,
        crc32,
        next: payload_end + 4,
    })
}

fn decompress(entry: &RawEntry<'_>, offset: u64) -> PackResult<Vec<u8>> {
    if crc32fast::hash(entry.payload) != entry.crc32 {
        return Err(PackError::CrcMismatch { offset });
    }
    let data = zstd::decode_all(entry.payload)
        .map_err(|e| PackError::DecompressionFailed(e.to_string()))?;
    if data.len() as u64 != entry.raw_len {
        return Err(PackError::CorruptEntry {
            offset,
            reason: format!("expected {} bytes, decompressed {}", entry.raw_len, data.len()),
        });
    }
    Ok(data)
}
