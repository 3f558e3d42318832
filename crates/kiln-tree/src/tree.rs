//! The Merkle search tree handle and its operations.
//!
//! A [`MerkleTree`] is just a root identifier plus configuration; nodes are
//! read lazily from a [`BlockSource`]. Updates never mutate nodes: `bulk`
//! returns a new tree and the blocks it introduced, which the caller must
//! persist before publishing the new root.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::marker::PhantomData;

use kiln_crypto::Block;
use kiln_types::Cid;
use kiln_valet::BlockSource;
use tracing::debug;

use crate::error::{TreeError, TreeResult};
use crate::node::{build, Node, TreeConfig, TreeKey, TreeValue};

/// One change applied by [`MerkleTree::bulk`].
#[derive(Clone, Debug, PartialEq)]
pub enum Op<K, V> {
    Put(K, V),
    Del(K),
}

impl<K, V> Op<K, V> {
    pub fn key(&self) -> &K {
        match self {
            Op::Put(k, _) | Op::Del(k) => k,
        }
    }
}

/// Entries found by a read, plus every node identifier visited on the way.
#[derive(Clone, Debug, PartialEq)]
pub struct Scan<K, V> {
    pub entries: Vec<(K, V)>,
    pub visited: Vec<Cid>,
}

/// Outcome of [`MerkleTree::bulk`].
#[derive(Debug)]
pub struct BulkResult<K, V> {
    pub tree: MerkleTree<K, V>,
    /// Nodes of the new tree that the old tree did not have.
    pub blocks: Vec<Block>,
}

#[derive(Debug)]
pub struct MerkleTree<K, V> {
    root: Option<Cid>,
    config: TreeConfig,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for MerkleTree<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root,
            config: self.config,
            _marker: PhantomData,
        }
    }
}

async fn load_node<K: TreeKey, V: TreeValue, S: BlockSource + ?Sized>(
    source: &S,
    cid: &Cid,
) -> TreeResult<Node<K, V>> {
    let block = source
        .get(cid)
        .await?
        .ok_or(TreeError::MissingNode(*cid))?;
    Ok(block.decode()?)
}

impl<K: TreeKey, V: TreeValue> MerkleTree<K, V> {
    /// An empty tree.
    pub fn create(config: TreeConfig) -> Self {
        Self::load(None, config)
    }

    /// A tree rooted at `root`. No node is read until an operation needs it.
    pub fn load(root: Option<Cid>, config: TreeConfig) -> Self {
        Self {
            root,
            config,
            _marker: PhantomData,
        }
    }

    pub fn root(&self) -> Option<Cid> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Every entry in key order.
    pub async fn entries<S: BlockSource + ?Sized>(&self, source: &S) -> TreeResult<Scan<K, V>> {
        self.scan(source, None, None).await
    }

    /// Entries with `low <= key <= high`, in key order.
    pub async fn range<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        low: &K,
        high: &K,
    ) -> TreeResult<Scan<K, V>> {
        self.scan(source, Some(low), Some(high)).await
    }

    /// Exact lookups. Keys that are absent are skipped; the result is in the
    /// order of `keys`.
    pub async fn get_many<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        keys: &[K],
    ) -> TreeResult<Scan<K, V>> {
        let mut scan = Scan {
            entries: Vec::new(),
            visited: Vec::new(),
        };
        for key in keys {
            let found = self.range(source, key, key).await?;
            scan.entries.extend(found.entries);
            scan.visited.extend(found.visited);
        }
        Ok(scan)
    }

    async fn scan<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        low: Option<&K>,
        high: Option<&K>,
    ) -> TreeResult<Scan<K, V>> {
        let mut scan = Scan {
            entries: Vec::new(),
            visited: Vec::new(),
        };
        let Some(root) = self.root else {
            return Ok(scan);
        };

        // Depth-first, children pushed in reverse so output stays sorted.
        let mut stack = vec![root];
        while let Some(cid) = stack.pop() {
            scan.visited.push(cid);
            match load_node::<K, V, S>(source, &cid).await? {
                Node::Leaf { entries } => {
                    for (key, value) in entries {
                        if in_range(&key, low, high)? {
                            scan.entries.push((key, value));
                        }
                    }
                }
                Node::Branch { children } => {
                    let mut selected = Vec::new();
                    for (i, (first, child)) in children.iter().enumerate() {
                        // Child i holds keys in [first, next first).
                        if let (Some(low), Some((next, _))) = (low, children.get(i + 1)) {
                            if low.compare(next)? != Ordering::Less {
                                continue;
                            }
                        }
                        if let Some(high) = high {
                            if high.compare(first)? == Ordering::Less {
                                break;
                            }
                        }
                        selected.push(*child);
                    }
                    stack.extend(selected.into_iter().rev());
                }
            }
        }
        Ok(scan)
    }

    /// Apply `ops` and return the resulting tree.
    ///
    /// When several operations name the same key the last one wins. The new
    /// root depends only on the final set of entries.
    ///
    /// Reads every node of the current tree and rebuilds from the merged
    /// entries, so each call costs O(N) node reads in the tree size.
    /// Unchanged nodes hash the same and are not returned.
    pub async fn bulk<S: BlockSource + ?Sized>(
        &self,
        source: &S,
        mut ops: Vec<Op<K, V>>,
    ) -> TreeResult<BulkResult<K, V>> {
        let existing = self.entries(source).await?;
        let old_nodes: HashSet<Cid> = existing.visited.iter().copied().collect();

        let mut failure = None;
        ops.sort_by(|a, b| match a.key().compare(b.key()) {
            Ok(order) => order,
            Err(e) => {
                failure.get_or_insert(e);
                Ordering::Equal
            }
        });
        if let Some(e) = failure {
            return Err(e);
        }
        let ops = last_op_per_key(ops)?;
        let op_count = ops.len();

        let mut merged = Vec::with_capacity(existing.entries.len() + ops.len());
        let mut current = existing.entries.into_iter().peekable();
        for op in ops {
            while let Some((key, _)) = current.peek() {
                if op.key().compare(key)? != Ordering::Greater {
                    break;
                }
                if let Some(entry) = current.next() {
                    merged.push(entry);
                }
            }
            if let Some((key, _)) = current.peek() {
                if op.key().compare(key)? == Ordering::Equal {
                    current.next();
                }
            }
            if let Op::Put(key, value) = op {
                merged.push((key, value));
            }
        }
        merged.extend(current);

        let (root, blocks) = build(merged, &self.config)?;
        let blocks: Vec<Block> = blocks
            .into_iter()
            .filter(|b| !old_nodes.contains(b.cid()))
            .collect();
        debug!(
            ops = op_count,
            new_nodes = blocks.len(),
            root = ?root.map(|c| c.short_hex()),
            "tree bulk applied"
        );
        Ok(BulkResult {
            tree: Self::load(root, self.config),
            blocks,
        })
    }
}

fn in_range<K: TreeKey>(key: &K, low: Option<&K>, high: Option<&K>) -> TreeResult<bool> {
    if let Some(low) = low {
        if low.compare(key)? == Ordering::Greater {
            return Ok(false);
        }
    }
    if let Some(high) = high {
        if high.compare(key)? == Ordering::Less {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Collapse runs of equal keys in sorted `ops` to their final operation.
fn last_op_per_key<K: TreeKey, V>(ops: Vec<Op<K, V>>) -> TreeResult<Vec<Op<K, V>>> {
    let mut out: Vec<Op<K, V>> = Vec::with_capacity(ops.len());
    for op in ops {
        if let Some(prev) = out.last_mut() {
            if op.key().compare(prev.key())? == Ordering::Equal {
                *prev = op;
                continue;
            }
        }
        out.push(op);
    }
    Ok(out)
}
