use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use hive_model::Manifest;
use hive_types::ObjectId;
use tempfile::NamedTempFile;

use crate::entry::EntryKind;
use crate::error::{PackError, PackResult};

/// Magic bytes opening every bundle.
pub const BUNDLE_MAGIC: &[u8; 4] = b"HIVB";
/// Current format version.
pub const BUNDLE_VERSION: u32 = 1;
pub(crate) const HEADER_LEN: usize = 12;
pub(crate) const TRAILER_LEN: usize = 32;
const ZSTD_LEVEL: i32 = 3;

/// Result of writing a bundle file.
#[derive(Clone, Debug)]
pub struct BundleFile {
    pub path: PathBuf,
    pub object_count: usize,
    pub manifest_count: usize,
    pub checksum: [u8; 32],
}

/// Builds a bundle from objects and manifests.
///
/// Layout, all integers big-endian:
///
/// ```text
/// "HIVB" | version: u32 | entry count: u32
/// entry*: type: u8 | [object id: 32 bytes, objects only]
///         | raw len: varint | compressed len: varint
///         | zstd payload | crc32 of payload: u32
/// blake3 of everything above: 32 bytes
/// ```
///
/// Objects are written before manifests, each object once.
#[derive(Debug, Default)]
pub struct BundleWriter {
    objects: Vec<(ObjectId, Vec<u8>)>,
    seen: BTreeSet<ObjectId>,
    manifests: Vec<Vec<u8>>,
}

impl BundleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue object bytes. Returns their id; adding the same bytes twice
    /// queues them once.
    pub fn add_object(&mut self, data: &[u8]) -> ObjectId {
        let id = ObjectId::from_bytes(data);
        if self.seen.insert(id) {
            self.objects.push((id, data.to_vec()));
        }
        id
    }

    pub fn add_manifest(&mut self, manifest: &Manifest) -> PackResult<()> {
        let json =
            serde_json::to_vec(manifest).map_err(|e| PackError::Serialization(e.to_string()))?;
        self.manifests.push(json);
        Ok(())
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn manifest_count(&self) -> usize {
        self.manifests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.manifests.is_empty()
    }

    /// Stream the bundle into `out`. Returns the trailer checksum.
    pub fn write_to(&self, out: &mut dyn Write) -> PackResult<[u8; 32]> {
        let mut out = HashingWriter {
            inner: out,
            hasher: blake3::Hasher::new(),
        };
        let count = (self.objects.len() + self.manifests.len()) as u32;
        out.write_all(BUNDLE_MAGIC)?;
        out.write_all(&BUNDLE_VERSION.to_be_bytes())?;
        out.write_all(&count.to_be_bytes())?;

        for (id, data) in &self.objects {
            write_entry(&mut out, EntryKind::Object, Some(id), data)?;
        }
        for json in &self.manifests {
            write_entry(&mut out, EntryKind::Manifest, None, json)?;
        }

        let checksum = *out.hasher.finalize().as_bytes();
        out.inner.write_all(&checksum)?;
        out.inner.flush()?;
        Ok(checksum)
    }

    /// Build the bundle in memory.
    pub fn finish_to_bytes(&self) -> PackResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        Ok(bytes)
    }

    /// Write the bundle to `path`, replacing any existing file atomically.
    pub fn finish(&self, path: &Path) -> PackResult<BundleFile> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut staged = NamedTempFile::new_in(dir)?;
        let checksum = {
            let mut buffered = io::BufWriter::new(staged.as_file_mut());
            self.write_to(&mut buffered)?
        };
        staged.persist(path).map_err(|e| PackError::Io(e.error))?;
        Ok(BundleFile {
            path: path.to_path_buf(),
            object_count: self.objects.len(),
            manifest_count: self.manifests.len(),
            checksum,
        })
    }
}

fn write_entry(
    out: &mut dyn Write,
    kind: EntryKind,
    id: Option<&ObjectId>,
    data: &[u8],
) -> PackResult<()> {
    let compressed = zstd::encode_all(data, ZSTD_LEVEL)
        .map_err(|e| PackError::CompressionFailed(e.to_string()))?;
    let mut head = vec![kind.type_byte()];
    if let Some(id) = id {
        head.extend_from_slice(id.as_bytes());
    }
    encode_varint(&mut head, data.len() as u64);
    encode_varint(&mut head, compressed.len() as u64);
    out.write_all(&head)?;
    out.write_all(&compressed)?;
    out.write_all(&crc32fast::hash(&compressed).to_be_bytes())?;
    Ok(())
}

struct HashingWriter<'a> {
    inner: &'a mut dyn Write,
    hasher: blake3::Hasher,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8]) -> Result<(u64, usize), &'static str> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err("varint overflow");
        }
    }
    Err("truncated varint")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_boundaries() {
        for value in [0, 1, 127, 128, 16_383, 16_384, 1_000_000, u64::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, value);
            assert_eq!(decode_varint(&buf).unwrap(), (value, buf.len()), "{value}");
        }
    }

    #[test]
    fn varint_truncated_and_overflowing() {
        assert_eq!(decode_varint(&[0x80]), Err("truncated varint"));
        assert_eq!(decode_varint(&[0xFF; 11]), Err("varint overflow"));
    }

    #[test]
    fn header_and_trailer_layout() {
        let mut writer = BundleWriter::new();
        writer.add_object(b"one");
        writer.add_object(b"one");
        let bytes = writer.finish_to_bytes().unwrap();
        assert_eq!(&bytes[..4], BUNDLE_MAGIC);
        assert_eq!(u32::from_be_bytes(bytes[4..8].try_into().unwrap()), BUNDLE_VERSION);
        assert_eq!(u32::from_be_bytes(bytes[8..12].try_into().unwrap()), 1);
        let (body, trailer) = bytes.split_at(bytes.len() - TRAILER_LEN);
        assert_eq!(trailer, blake3::hash(body).as_bytes());
    }

    #[test]
    fn streaming_matches_in_memory() {
        let mut writer = BundleWriter::new();
        writer.add_object(b"streamed");
        let tmp = tempfile::tempdir().unwrap();
        let file = writer.finish(&tmp.path().join("out.hivb")).unwrap();
        assert_eq!(file.object_count, 1);
        assert_eq!(std::fs::read(&file.path).unwrap(), writer.finish_to_bytes().unwrap());
    }
}
