use hive_types::ObjectId;

/// Random-access index over the object entries of a bundle, rebuilt each
/// time a bundle is opened.
///
/// - Fan-out table: 256 counts of objects whose first id byte is <= index
/// - Sorted object ids
/// - CRC32 and entry offsets, parallel to the ids
#[derive(Clone, Debug)]
pub struct BundleIndex {
    pub fan_out: [u32; 256],
    pub object_ids: Vec<ObjectId>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
}

impl BundleIndex {
    /// Build from `(id, crc32, offset)` entries. A duplicated id keeps its
    /// first entry.
    pub fn build(mut entries: Vec<(ObjectId, u32, u64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.2.cmp(&b.2)));
        entries.dedup_by(|later, first| later.0 == first.0);

        let mut fan_out = [0u32; 256];
        let mut object_ids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());
        for (id, crc, offset) in &entries {
            object_ids.push(*id);
            crc32s.push(*crc);
            offsets.push(*offset);
        }

        for id in &object_ids {
            fan_out[id.as_bytes()[0] as usize] += 1;
        }
        for slot in 1..256 {
            fan_out[slot] += fan_out[slot - 1];
        }

        Self {
            fan_out,
            object_ids,
            crc32s,
            offsets,
        }
    }

    /// `(offset, crc32)` of an object's entry.
    pub fn lookup(&self, id: &ObjectId) -> Option<(u64, u32)> {
        let first_byte = id.as_bytes()[0] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        let range = &self.object_ids[start..end];
        range.binary_search(id).ok().map(|pos| {
            let idx = start + pos;
            (self.offsets[idx], self.crc32s[idx])
        })
    }

    pub fn object_count(&self) -> usize {
        self.object_ids.len()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.lookup(id).is_some()
    }
}
