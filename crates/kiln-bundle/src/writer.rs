use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use kiln_crypto::{Block, ContentHasher};
use kiln_types::Cid;

use crate::error::{BundleError, BundleResult};

pub(crate) const MAGIC: &[u8; 4] = b"KLNB";
pub(crate) const VERSION: u32 = 1;
const ZSTD_LEVEL: i32 = 3;

/// A finished bundle: its identifier and serialized bytes.
///
/// The identifier is the bundle-domain hash of `bytes`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleFile {
    pub cid: Cid,
    pub bytes: Bytes,
}

impl BundleFile {
    /// Wrap existing bundle bytes, deriving the identifier.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let cid = ContentHasher::BUNDLE.hash(&bytes);
        Self { cid, bytes }
    }
}

/// Packages blocks and named roots into one immutable bundle.
///
/// On-disk format:
/// ```text
/// "KLNB" | version: u32 BE | root count: u32 BE
///   per root:  varint name length | name | cid (32)
/// block count: u32 BE
///   per block: cid (32) | crc32: u32 BE | varint raw size | varint compressed size | zstd data
/// BLAKE3 checksum (32) of everything above
/// ```
#[derive(Debug, Default)]
pub struct BundleWriter {
    roots: BTreeMap<String, Cid>,
    blocks: Vec<Block>,
    seen: HashSet<Cid>,
}

impl BundleWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name a root carried by the bundle. Re-adding a name replaces it.
    pub fn add_root(&mut self, name: impl Into<String>, cid: Cid) {
        self.roots.insert(name.into(), cid);
    }

    /// Queue a block. Duplicate identifiers are stored once.
    pub fn add_block(&mut self, block: &Block) {
        if self.seen.insert(*block.cid()) {
            self.blocks.push(block.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Identifiers of the queued blocks, in insertion order.
    pub fn block_ids(&self) -> Vec<Cid> {
        self.blocks.iter().map(|b| *b.cid()).collect()
    }

    /// Serialize the bundle.
    pub fn finish(self) -> BundleResult<BundleFile> {
        let mut data = Vec::new();

        data.extend_from_slice(MAGIC);
        data.extend_from_slice(&VERSION.to_be_bytes());

        data.extend_from_slice(&(self.roots.len() as u32).to_be_bytes());
        for (name, cid) in &self.roots {
            encode_varint(&mut data, name.len() as u64);
            data.extend_from_slice(name.as_bytes());
            data.extend_from_slice(cid.as_bytes());
        }

        data.extend_from_slice(&(self.blocks.len() as u32).to_be_bytes());
        for block in &self.blocks {
            let compressed = zstd::encode_all(block.bytes().as_ref(), ZSTD_LEVEL)
                .map_err(|e| BundleError::CompressionFailed(e.to_string()))?;

            data.extend_from_slice(block.cid().as_bytes());
            data.extend_from_slice(&crc32fast::hash(&compressed).to_be_bytes());
            encode_varint(&mut data, block.len() as u64);
            encode_varint(&mut data, compressed.len() as u64);
            data.extend_from_slice(&compressed);
        }

        let checksum = *blake3::hash(&data).as_bytes();
        data.extend_from_slice(&checksum);

        tracing::debug!(
            blocks = self.blocks.len(),
            roots = self.roots.len(),
            bytes = data.len(),
            "bundle written"
        );

        Ok(BundleFile::from_bytes(data))
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

/// Decode a variable-length integer. Returns `(value, bytes_consumed)`.
pub(crate) fn decode_varint(data: &[u8], offset: u64) -> BundleResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(BundleError::CorruptEntry {
                offset,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(BundleError::CorruptEntry {
        offset,
        reason: "truncated varint".into(),
    })
}
