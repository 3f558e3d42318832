//! The incremental index engine.
//!
//! A [`DbIndex`] keeps two trees in step with a change feed:
//!
//! - the primary tree, `IndexKey -> emitted value`, answering queries
//! - the shadow tree, `document id -> [IndexKey]`, recording what every
//!   document emitted last time so stale entries can be retracted
//!
//! Each update cycle reads the changes since the last clock, retracts the
//! entries of every changed document, maps the live ones again, and merges
//! the result into both trees inside one block store transaction. The new
//! roots are adopted only after the transaction commits.

use std::sync::{Arc, RwLock};

use kiln_tree::{MerkleTree, Op, TreeConfig, TreeKey, TreeValue};
use kiln_types::{Cid, Clock, Header};
use kiln_valet::{Blockstore, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::entry::{Document, Emitter, IndexKey, MapFn, RowRef};
use crate::error::{IndexError, IndexResult};
use crate::feed::ChangeFeed;
use crate::keys::KeyValue;

/// Header root naming the primary tree.
pub const PRIMARY_ROOT: &str = "index";
/// Header root naming the shadow tree.
pub const SHADOW_ROOT: &str = "by_id";

type PrimaryTree = MerkleTree<IndexKey, Value>;
type ShadowTree = MerkleTree<String, Vec<IndexKey>>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RebuildMode {
    /// Apply only the changes since the last cycle.
    #[default]
    Incremental,
    /// Discard both trees and re-index the whole history every cycle.
    AlwaysRebuild,
}

#[derive(Clone, Debug)]
pub struct IndexConfig {
    pub name: String,
    pub rebuild: RebuildMode,
    /// Branch whose header records the index roots after each cycle.
    pub header_branch: Option<String>,
    pub tree: TreeConfig,
}

impl IndexConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rebuild: RebuildMode::default(),
            header_branch: None,
            tree: TreeConfig::default(),
        }
    }

    pub fn with_rebuild(mut self, rebuild: RebuildMode) -> Self {
        self.rebuild = rebuild;
        self
    }

    pub fn with_header_branch(mut self, branch: impl Into<String>) -> Self {
        self.header_branch = Some(branch.into());
        self
    }
}

/// The roots and clock of one committed update cycle.
///
/// `clock` is `None` until the first cycle completes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexState {
    pub primary: Option<Cid>,
    pub shadow: Option<Cid>,
    pub clock: Option<Clock>,
}

impl IndexState {
    pub fn is_built(&self) -> bool {
        self.clock.is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Rows whose emitted key equals this key.
    Key(KeyValue),
    /// Rows whose emitted key lies in `[low, high]`.
    Range(KeyValue, KeyValue),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: String,
    pub key: Value,
    pub value: Value,
}

/// Identifiers of every primary-tree node read while answering a query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    pub index: Vec<Cid>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub rows: Vec<Row>,
    pub proof: Proof,
}

/// A secondary index over one change feed.
pub struct DbIndex {
    config: IndexConfig,
    feed: Arc<dyn ChangeFeed>,
    blocks: Arc<Blockstore>,
    map_fn: MapFn,
    state: RwLock<Arc<IndexState>>,
    update_lock: tokio::sync::Mutex<()>,
}

impl DbIndex {
    /// A fresh, never-built index.
    pub fn new(
        config: IndexConfig,
        feed: Arc<dyn ChangeFeed>,
        blocks: Arc<Blockstore>,
        map_fn: MapFn,
    ) -> Self {
        Self {
            config,
            feed,
            blocks,
            map_fn,
            state: RwLock::new(Arc::new(IndexState::default())),
            update_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open an index, restoring its roots from the configured header branch.
    ///
    /// A header without a shadow root cannot be updated incrementally, so
    /// the index starts over and rebuilds on the next cycle.
    pub async fn open(
        config: IndexConfig,
        feed: Arc<dyn ChangeFeed>,
        blocks: Arc<Blockstore>,
        map_fn: MapFn,
    ) -> IndexResult<Self> {
        let branch = config.header_branch.clone();
        let index = Self::new(config, feed, blocks, map_fn);
        let Some(branch) = branch else {
            return Ok(index);
        };
        let Some(header) = index.blocks.open_branch(&branch).await? else {
            debug!(index = %index.config.name, branch = %branch, "no saved header");
            return Ok(index);
        };

        let primary = header.root(PRIMARY_ROOT);
        let shadow = header.root(SHADOW_ROOT);
        if primary.is_some() && shadow.is_none() {
            warn!(index = %index.config.name, branch = %branch, "header lacks shadow root, rebuilding");
            return Ok(index);
        }
        let restored = IndexState {
            primary,
            shadow,
            clock: header.clock,
        };
        info!(
            index = %index.config.name,
            branch = %branch,
            clock = ?restored.clock.as_ref().map(ToString::to_string),
            "index restored"
        );
        index.adopt(restored)?;
        Ok(index)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Snapshot of the last committed state.
    pub fn state(&self) -> IndexResult<Arc<IndexState>> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|e| IndexError::Lock(e.to_string()))
    }

    fn adopt(&self, next: IndexState) -> IndexResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|e| IndexError::Lock(e.to_string()))?;
        *state = Arc::new(next);
        Ok(())
    }

    /// The header recording `state` on the configured branch, if any.
    fn header_for(&self, state: &IndexState) -> Option<(&str, Header)> {
        let branch = self.config.header_branch.as_deref()?;
        let mut header = Header::new();
        if let Some(root) = state.primary {
            header = header.with_root(PRIMARY_ROOT, root);
        }
        if let Some(root) = state.shadow {
            header = header.with_root(SHADOW_ROOT, root);
        }
        if let Some(clock) = &state.clock {
            header = header.with_clock(clock.clone());
        }
        Some((branch, header))
    }

    /// Bring the index up to date with the feed, then answer `query`.
    pub async fn query(&self, query: Query) -> IndexResult<QueryResponse> {
        self.update().await?;
        let state = self.state()?;

        let (low, high) = match &query {
            Query::Key(key) => (key, key),
            Query::Range(low, high) => (low, high),
        };
        let tree = PrimaryTree::load(state.primary, self.config.tree);
        let scan = tree
            .range(
                self.blocks.valet().as_ref(),
                &IndexKey::lower_bound(low),
                &IndexKey::upper_bound(high),
            )
            .await?;

        let mut rows = Vec::with_capacity(scan.entries.len());
        for (key, value) in scan.entries {
            let id = match key.reference {
                RowRef::Doc(id) => id,
                RowRef::Rank(rank) => rank.to_string(),
            };
            rows.push(Row {
                id,
                key: key.key.decode()?.to_json(),
                value,
            });
        }
        debug!(index = %self.config.name, rows = rows.len(), nodes = scan.visited.len(), "query answered");
        Ok(QueryResponse {
            rows,
            proof: Proof {
                index: scan.visited,
            },
        })
    }

    /// Run one update cycle. Concurrent calls on one index are serialized.
    pub async fn update(&self) -> IndexResult<()> {
        let _guard = self.update_lock.lock().await;
        let current = self.state()?;
        let prior = match self.config.rebuild {
            RebuildMode::Incremental => (*current).clone(),
            RebuildMode::AlwaysRebuild => IndexState::default(),
        };

        let changes = self.feed.changes_since(prior.clock.as_ref()).await?;
        if changes.rows.is_empty() {
            let next = IndexState {
                clock: Some(changes.clock),
                ..prior
            };
            if next != *current {
                let tx = self.blocks.begin(format!("index:{}", self.config.name));
                self.blocks.commit(tx, self.header_for(&next)).await?;
                debug!(index = %self.config.name, "clock advanced without changes");
                self.adopt(next)?;
            }
            return Ok(());
        }

        let mut tx = self.blocks.begin(format!("index:{}", self.config.name));
        let primary = PrimaryTree::load(prior.primary, self.config.tree);
        let shadow = ShadowTree::load(prior.shadow, self.config.tree);
        let mut primary_ops: Vec<Op<IndexKey, Value>> = Vec::new();
        let mut shadow_ops: Vec<Op<String, Vec<IndexKey>>> = Vec::new();

        if prior.is_built() {
            let ids: Vec<String> = changes.rows.iter().map(|c| c.key.clone()).collect();
            let old = shadow.get_many(&tx, &ids).await?;
            for (id, keys) in old.entries {
                primary_ops.extend(keys.into_iter().map(Op::Del));
                shadow_ops.push(Op::Del(id));
            }
        }
        let retracted = primary_ops.len();

        let mut emitted = 0;
        for change in &changes.rows {
            let Some(body) = change.value.as_ref().filter(|_| !change.del) else {
                continue;
            };
            let doc = Document::new(change.key.clone(), body.clone());
            let mut emitter = Emitter::new();
            (self.map_fn)(&doc, &mut emitter).map_err(|e| {
                warn!(index = %self.config.name, doc = %change.key, error = %e, "map function failed");
                e
            })?;

            let mut keys: Vec<IndexKey> = Vec::new();
            for (key, value) in emitter.into_entries() {
                let index_key = IndexKey::for_doc(&key, change.key.clone());
                if !keys.contains(&index_key) {
                    keys.push(index_key.clone());
                }
                primary_ops.push(Op::Put(index_key, value));
                emitted += 1;
            }
            if !keys.is_empty() {
                shadow_ops.push(Op::Put(change.key.clone(), keys));
            }
        }

        let primary = apply(&mut tx, primary, primary_ops).await?;
        let shadow = apply(&mut tx, shadow, shadow_ops).await?;
        let next = IndexState {
            primary: primary.root(),
            shadow: shadow.root(),
            clock: Some(changes.clock),
        };

        let bundle = self.blocks.commit(tx, self.header_for(&next)).await?;

        info!(
            index = %self.config.name,
            changes = changes.rows.len(),
            retracted,
            emitted,
            bundle = ?bundle.map(|c| c.short_hex()),
            "index updated"
        );
        self.adopt(next)
    }
}

/// Merge `ops` into `tree`, staging the new nodes in `tx`.
async fn apply<K: TreeKey, V: TreeValue>(
    tx: &mut Transaction,
    tree: MerkleTree<K, V>,
    ops: Vec<Op<K, V>>,
) -> IndexResult<MerkleTree<K, V>> {
    if ops.is_empty() {
        return Ok(tree);
    }
    let result = tree.bulk(&*tx, ops).await?;
    for block in result.blocks {
        tx.put(block);
    }
    Ok(result.tree)
}
