use std::collections::BTreeMap;

use bytes::Bytes;
use kiln_crypto::Block;
use kiln_types::Cid;

use crate::error::{BundleError, BundleResult};
use crate::index::BundleIndex;
use crate::writer::{decode_varint, MAGIC, VERSION};

const CHECKSUM_LEN: usize = 32;
/// Cid, crc and two one-byte varints.
const MIN_ENTRY_LEN: usize = 32 + 4 + 1 + 1;

/// Random-access reader over serialized bundle bytes.
#[derive(Debug)]
pub struct BundleReader {
    data: Bytes,
    roots: BTreeMap<String, Cid>,
    index: BundleIndex,
}

impl BundleReader {
    /// Parse and verify a bundle.
    ///
    /// Checks magic, version, and the trailing BLAKE3 checksum, then scans the
    /// entry table to build the block index. Block payloads are decompressed
    /// lazily by [`read_block`](Self::read_block).
    pub fn from_bytes(data: impl Into<Bytes>) -> BundleResult<Self> {
        let data = data.into();
        if data.len() < 12 + CHECKSUM_LEN {
            return Err(BundleError::CorruptEntry {
                offset: 0,
                reason: "bundle data too short".into(),
            });
        }
        if &data[0..4] != MAGIC {
            return Err(BundleError::InvalidMagic {
                expected: String::from_utf8_lossy(MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = read_u32(&data, 4)?;
        if version != VERSION {
            return Err(BundleError::UnsupportedVersion(version));
        }

        let body_end = data.len() - CHECKSUM_LEN;
        if blake3::hash(&data[..body_end]).as_bytes() != &data[body_end..] {
            return Err(BundleError::ChecksumMismatch);
        }

        let body = &data[..body_end];
        let mut pos = 8;
        let root_count = read_u32(body, pos)?;
        pos += 4;

        let mut roots = BTreeMap::new();
        for _ in 0..root_count {
            let offset = pos as u64;
            let (name_len, consumed) = decode_varint(tail(body, pos)?, offset)?;
            pos += consumed;
            let name_end = advance(pos, name_len, body_end, offset)?;
            let name = std::str::from_utf8(&body[pos..name_end])
                .map_err(|_| BundleError::CorruptEntry {
                    offset,
                    reason: "invalid root name".into(),
                })?
                .to_string();
            pos = name_end;
            let cid = read_cid(body, pos)?;
            pos += 32;
            roots.insert(name, cid);
        }

        let block_count = read_u32(body, pos)?;
        pos += 4;

        let plausible = (body_end - pos) / MIN_ENTRY_LEN;
        let mut entries = Vec::with_capacity((block_count as usize).min(plausible));
        for _ in 0..block_count {
            let offset = pos as u64;
            let cid = read_cid(body, pos)?;
            pos += 32;
            let crc = read_u32(body, pos)?;
            pos += 4;
            let (_, consumed) = decode_varint(tail(body, pos)?, offset)?;
            pos += consumed;
            let (compressed_size, consumed) = decode_varint(tail(body, pos)?, offset)?;
            pos += consumed;
            pos = advance(pos, compressed_size, body_end, offset)?;
            entries.push((cid, crc, offset));
        }

        Ok(Self {
            data,
            roots,
            index: BundleIndex::build(entries),
        })
    }

    /// Read a block by identifier. Returns `Ok(None)` if the bundle does not
    /// contain it.
    pub fn read_block(&self, id: &Cid) -> BundleResult<Option<Block>> {
        let (offset, expected_crc) = match self.index.lookup(id) {
            Some(v) => v,
            None => return Ok(None),
        };
        self.read_at_offset(id, offset, expected_crc).map(Some)
    }

    /// Decode every block in the bundle.
    pub fn blocks(&self) -> BundleResult<Vec<Block>> {
        self.index
            .block_ids
            .iter()
            .filter_map(|id| self.read_block(id).transpose())
            .collect()
    }

    pub fn roots(&self) -> &BTreeMap<String, Cid> {
        &self.roots
    }

    pub fn root(&self, name: &str) -> Option<Cid> {
        self.roots.get(name).copied()
    }

    pub fn contains(&self, id: &Cid) -> bool {
        self.index.contains(id)
    }

    pub fn block_count(&self) -> usize {
        self.index.block_count()
    }

    /// Identifiers of every block, sorted.
    pub fn block_ids(&self) -> &[Cid] {
        &self.index.block_ids
    }

    fn read_at_offset(&self, id: &Cid, offset: u64, expected_crc: u32) -> BundleResult<Block> {
        let data = &self.data[..self.data.len() - CHECKSUM_LEN];
        // Skip the cid and crc; both are already known from the index.
        let start = usize::try_from(offset).map_err(|_| out_of_bounds(offset))?;
        let mut pos = advance(start, 32 + 4, data.len(), offset)?;

        let (raw_size, consumed) = decode_varint(tail(data, pos)?, offset)?;
        pos += consumed;
        let (compressed_size, consumed) = decode_varint(tail(data, pos)?, offset)?;
        pos += consumed;

        let end = advance(pos, compressed_size, data.len(), offset)?;
        let compressed = &data[pos..end];
        if crc32fast::hash(compressed) != expected_crc {
            return Err(BundleError::CrcMismatch { id: *id });
        }

        let raw = zstd::decode_all(compressed)
            .map_err(|e| BundleError::DecompressionFailed(e.to_string()))?;
        if raw.len() as u64 != raw_size {
            return Err(BundleError::CorruptEntry {
                offset,
                reason: format!("size mismatch: expected {raw_size}, got {}", raw.len()),
            });
        }

        Block::from_parts(*id, raw).map_err(|_| BundleError::HashMismatch { id: *id })
    }
}

/// End of a `len`-byte span starting at `pos`, if it fits within `limit`.
fn advance(pos: usize, len: u64, limit: usize, offset: u64) -> BundleResult<usize> {
    usize::try_from(len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|end| *end <= limit)
        .ok_or_else(|| out_of_bounds(offset))
}

fn tail(data: &[u8], pos: usize) -> BundleResult<&[u8]> {
    data.get(pos..).ok_or_else(|| out_of_bounds(pos as u64))
}

fn out_of_bounds(offset: u64) -> BundleError {
    BundleError::CorruptEntry {
        offset,
        reason: "entry extends beyond bundle".into(),
    }
}

fn read_u32(data: &[u8], pos: usize) -> BundleResult<u32> {
    data.get(pos..pos.saturating_add(4))
        .and_then(|raw| raw.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| BundleError::CorruptEntry {
            offset: pos as u64,
            reason: "truncated u32".into(),
        })
}

fn read_cid(data: &[u8], pos: usize) -> BundleResult<Cid> {
    data.get(pos..pos.saturating_add(32))
        .and_then(|raw| <[u8; 32]>::try_from(raw).ok())
        .map(Cid::from_hash)
        .ok_or_else(|| BundleError::CorruptEntry {
            offset: pos as u64,
            reason: "truncated cid".into(),
        })
}
