//! The block codec: deterministic serialization plus content addressing.

use bytes::Bytes;
use kiln_types::Cid;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::hasher::{ContentHasher, HasherError};

/// An immutable payload named by the hash of its bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    bytes: Bytes,
}

impl Block {
    /// Serialize `value` as canonical JSON and address it under the block
    /// domain. Object keys are emitted in sorted order, so equal values
    /// always produce equal blocks.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, HasherError> {
        let bytes =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Address raw bytes under the block domain.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let cid = ContentHasher::BLOCK.hash(&bytes);
        Self { cid, bytes }
    }

    /// Rebuild a block from a claimed identifier, checking integrity.
    pub fn from_parts(cid: Cid, bytes: impl Into<Bytes>) -> Result<Self, HasherError> {
        let block = Self::from_bytes(bytes);
        if block.cid != cid {
            return Err(HasherError::HashMismatch {
                expected: cid,
                computed: block.cid,
            });
        }
        Ok(block)
    }

    /// Decode the payload back into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HasherError> {
        serde_json::from_slice(&self.bytes).map_err(|e| HasherError::Serialization(e.to_string()))
    }

    /// Recompute the identifier and compare it with the stored one.
    pub fn verify(&self) -> bool {
        ContentHasher::BLOCK.verify(&self.bytes, &self.cid)
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Leaf {
        keys: Vec<String>,
    }

    #[test]
    fn encode_decode() {
        let leaf = Leaf {
            keys: vec!["a".into(), "b".into()],
        };
        let block = Block::encode(&leaf).unwrap();
        assert_eq!(block.decode::<Leaf>().unwrap(), leaf);
    }

    #[test]
    fn equal_values_share_a_cid() {
        let a = Block::encode(&serde_json::json!({"x": 1, "y": [1, 2]})).unwrap();
        let b = Block::encode(&serde_json::json!({"y": [1, 2], "x": 1})).unwrap();
        assert_eq!(a.cid(), b.cid());
    }

    #[test]
    fn from_parts_rejects_wrong_cid() {
        let block = Block::from_bytes(&b"payload"[..]);
        let err = Block::from_parts(Cid::from_bytes(b"other"), &b"payload"[..]).unwrap_err();
        assert!(matches!(err, HasherError::HashMismatch { computed, .. } if computed == *block.cid()));
    }

    #[test]
    fn from_parts_accepts_matching_cid() {
        let block = Block::from_bytes(&b"payload"[..]);
        let rebuilt = Block::from_parts(*block.cid(), block.bytes().clone()).unwrap();
        assert_eq!(rebuilt, block);
    }

    #[test]
    fn fresh_block_verifies() {
        assert!(Block::from_bytes(&b"payload"[..]).verify());
    }

    #[test]
    fn decode_wrong_shape_fails() {
        let block = Block::from_bytes(&b"[1,2,3]"[..]);
        assert!(matches!(
            block.decode::<Leaf>(),
            Err(HasherError::Serialization(_))
        ));
    }
}
