use kiln_types::Cid;

/// Block index for random access into a parsed bundle.
///
/// Layout follows a fan-out table over the first identifier byte plus sorted
/// parallel arrays:
/// - `fan_out[i]` counts blocks whose first byte is `<= i`
/// - sorted `Cid` array
/// - CRC32 array (parallel)
/// - offset array (parallel)
#[derive(Clone, Debug)]
pub struct BundleIndex {
    pub fan_out: [u32; 256],
    pub block_ids: Vec<Cid>,
    pub crc32s: Vec<u32>,
    pub offsets: Vec<u64>,
}

impl BundleIndex {
    /// Build an index from `(cid, crc32, offset)` entries.
    pub fn build(mut entries: Vec<(Cid, u32, u64)>) -> Self {
        entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        let mut fan_out = [0u32; 256];
        let mut block_ids = Vec::with_capacity(entries.len());
        let mut crc32s = Vec::with_capacity(entries.len());
        let mut offsets = Vec::with_capacity(entries.len());

        for (id, crc, offset) in &entries {
            block_ids.push(*id);
            crc32s.push(*crc);
            offsets.push(*offset);
        }

        for (i, id) in block_ids.iter().enumerate() {
            let first_byte = id.as_bytes()[0] as usize;
            for slot in fan_out.iter_mut().skip(first_byte) {
                *slot = (i + 1) as u32;
            }
        }

        Self {
            fan_out,
            block_ids,
            crc32s,
            offsets,
        }
    }

    /// Look up a block's `(offset, crc32)` by identifier.
    pub fn lookup(&self, id: &Cid) -> Option<(u64, u32)> {
        let first_byte = id.as_bytes()[0] as usize;
        let start = if first_byte == 0 {
            0
        } else {
            self.fan_out[first_byte - 1] as usize
        };
        let end = self.fan_out[first_byte] as usize;

        let range = &self.block_ids[start..end];
        match range.binary_search_by(|probe| probe.as_bytes().cmp(id.as_bytes())) {
            Ok(pos) => {
                let idx = start + pos;
                Some((self.offsets[idx], self.crc32s[idx]))
            }
            Err(_) => None,
        }
    }

    pub fn block_count(&self) -> usize {
        self.block_ids.len()
    }

    pub fn contains(&self, id: &Cid) -> bool {
        self.lookup(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index() {
        let idx = BundleIndex::build(vec![]);
        assert_eq!(idx.block_count(), 0);
        assert!(!idx.contains(&Cid::from_bytes(b"anything")));
    }

    #[test]
    fn lookup_returns_offset_and_crc() {
        let a = Cid::from_bytes(b"a");
        let b = Cid::from_bytes(b"b");
        let idx = BundleIndex::build(vec![(a, 11, 100), (b, 22, 200)]);
        assert_eq!(idx.lookup(&a), Some((100, 11)));
        assert_eq!(idx.lookup(&b), Some((200, 22)));
        assert_eq!(idx.lookup(&Cid::from_bytes(b"c")), None);
    }

    #[test]
    fn fan_out_is_monotonic() {
        let entries: Vec<(Cid, u32, u64)> = (0..64u64)
            .map(|i| (Cid::from_bytes(&i.to_be_bytes()), 0, i))
            .collect();
        let idx = BundleIndex::build(entries);
        assert_eq!(idx.fan_out[255], 64);
        assert!(idx.fan_out.windows(2).all(|w| w[0] <= w[1]));
        for id in &idx.block_ids {
            assert!(idx.contains(id));
        }
    }
}
