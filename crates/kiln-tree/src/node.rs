//! Tree nodes and the deterministic chunker that builds them.
//!
//! Node boundaries are content-defined: a leaf chunk ends after an entry
//! whose key hash is divisible by the branching factor, and a branch chunk
//! ends after a child whose identifier is. The shape therefore depends only
//! on the set of entries, never on the order they were inserted in.

use std::cmp::Ordering;
use std::fmt::Debug;

use kiln_crypto::{Block, ContentHasher};
use kiln_types::Cid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{TreeError, TreeResult};

const BOUNDARY: ContentHasher = ContentHasher::new("kiln-tree-boundary-v1");

/// Ordering for tree keys. Comparison may reject its operands.
///
/// The tree always calls `probe.compare(stored)`, where `probe` is the key
/// supplied by the caller (a lookup key, a range bound, or an incoming
/// operation) and `stored` is a key already held in a node.
pub trait TreeKey: Clone + Debug + Serialize + DeserializeOwned + Send + Sync {
    fn compare(&self, stored: &Self) -> TreeResult<Ordering>;
}

impl TreeKey for String {
    fn compare(&self, stored: &Self) -> TreeResult<Ordering> {
        Ok(self.as_str().cmp(stored.as_str()))
    }
}

/// Values a tree can carry.
pub trait TreeValue: Clone + Debug + Serialize + DeserializeOwned + Send + Sync {}

impl<T: Clone + Debug + Serialize + DeserializeOwned + Send + Sync> TreeValue for T {}

/// One content-addressed tree node.
///
/// A branch child is keyed by the first key stored beneath it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node<K, V> {
    Leaf { entries: Vec<(K, V)> },
    Branch { children: Vec<(K, Cid)> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeConfig {
    /// Expected number of entries per node.
    pub branching_factor: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            branching_factor: 4,
        }
    }
}

impl TreeConfig {
    fn factor(&self) -> u32 {
        self.branching_factor.max(1)
    }
}

fn boundary_hash(data: &[u8]) -> u32 {
    let cid = BOUNDARY.hash(data);
    let b = cid.as_bytes();
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn key_is_boundary<K: Serialize>(key: &K, factor: u32) -> TreeResult<bool> {
    let bytes = serde_json::to_vec(key)
        .map_err(|e| TreeError::Codec(kiln_crypto::HasherError::Serialization(e.to_string())))?;
    Ok(boundary_hash(&bytes) % factor == 0)
}

fn cid_is_boundary(cid: &Cid, factor: u32) -> bool {
    boundary_hash(cid.as_bytes()) % factor == 0
}

/// Build a tree over `entries`, which must be sorted and free of
/// duplicates. Returns the root and every block of the tree.
pub(crate) fn build<K: TreeKey, V: TreeValue>(
    entries: Vec<(K, V)>,
    config: &TreeConfig,
) -> TreeResult<(Option<Cid>, Vec<Block>)> {
    if entries.is_empty() {
        return Ok((None, Vec::new()));
    }
    let factor = config.factor();
    let mut blocks = Vec::new();

    let mut level: Vec<(K, Cid)> = Vec::new();
    let mut chunk: Vec<(K, V)> = Vec::new();
    let total = entries.len();
    for (i, (key, value)) in entries.into_iter().enumerate() {
        let ends = key_is_boundary(&key, factor)? || i + 1 == total;
        chunk.push((key, value));
        if ends {
            let first = chunk[0].0.clone();
            let block = Block::encode(&Node::<K, V>::Leaf {
                entries: std::mem::take(&mut chunk),
            })?;
            level.push((first, *block.cid()));
            blocks.push(block);
        }
    }

    while level.len() > 1 {
        let mut next: Vec<(K, Cid)> = Vec::new();
        let mut chunk: Vec<(K, Cid)> = Vec::new();
        let total = level.len();
        for (i, (key, cid)) in level.into_iter().enumerate() {
            chunk.push((key, cid));
            let ends = (chunk.len() >= 2 && cid_is_boundary(&cid, factor)) || i + 1 == total;
            if ends {
                let first = chunk[0].0.clone();
                let block = Block::encode(&Node::<K, V>::Branch {
                    children: std::mem::take(&mut chunk),
                })?;
                next.push((first, *block.cid()));
                blocks.push(block);
            }
        }
        level = next;
    }

    Ok((level.pop().map(|(_, cid)| cid), blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<(String, u32)> {
        (0..n).map(|i| (format!("key-{i:04}"), i as u32)).collect()
    }

    #[test]
    fn empty_input_has_no_root() {
        let (root, blocks) = build::<String, u32>(Vec::new(), &TreeConfig::default()).unwrap();
        assert!(root.is_none());
        assert!(blocks.is_empty());
    }

    #[test]
    fn single_entry_is_one_leaf() {
        let (root, blocks) = build(entries(1), &TreeConfig::default()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(root, Some(*blocks[0].cid()));
        let node: Node<String, u32> = blocks[0].decode().unwrap();
        assert!(matches!(node, Node::Leaf { entries } if entries.len() == 1));
    }

    #[test]
    fn build_is_deterministic() {
        let a = build(entries(200), &TreeConfig::default()).unwrap();
        let b = build(entries(200), &TreeConfig::default()).unwrap();
        assert_eq!(a.0, b.0);
        assert!(a.1.len() > 1);
    }

    #[test]
    fn zero_factor_is_treated_as_one() {
        let config = TreeConfig {
            branching_factor: 0,
        };
        let (root, blocks) = build(entries(10), &config).unwrap();
        assert!(root.is_some());
        // Every entry is its own leaf.
        let leaves = blocks
            .iter()
            .filter(|b| matches!(b.decode::<Node<String, u32>>(), Ok(Node::Leaf { .. })))
            .count();
        assert_eq!(leaves, 10);
    }

    #[test]
    fn string_keys_compare_lexically() {
        let a = "a".to_string();
        let b = "b".to_string();
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
        assert_eq!(b.compare(&a).unwrap(), Ordering::Greater);
        assert_eq!(a.compare(&a).unwrap(), Ordering::Equal);
    }
}
