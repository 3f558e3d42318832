//! Transactions over the valet.
//!
//! A [`Transaction`] collects new blocks while letting readers see them
//! before they are durable. [`Blockstore::commit`] packages the pending
//! blocks into one bundle, parks it, and only then writes the branch header,
//! so a header never names a block that is not yet resolvable.
//!
//! Each committed bundle carries a `parent` root naming the previous one.
//! The header's `bundle` field points at the newest, so [`Valet::hydrate`]
//! can rebuild the block index after a restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_bundle::BundleWriter;
use kiln_crypto::Block;
use kiln_types::{Cid, Header};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ValetResult;
use crate::source::BlockSource;
use crate::valet::Valet;
use crate::PARENT_ROOT;

/// Pending writes against a [`Blockstore`]. Dropping it discards them.
pub struct Transaction {
    label: String,
    valet: Arc<Valet>,
    pending: HashMap<Cid, Block>,
    order: Vec<Cid>,
}

impl Transaction {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stage a block. Duplicates are kept once.
    pub fn put(&mut self, block: Block) {
        let cid = *block.cid();
        if self.pending.insert(cid, block).is_none() {
            self.order.push(cid);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn into_blocks(mut self) -> Vec<Block> {
        self.order
            .iter()
            .filter_map(|cid| self.pending.remove(cid))
            .collect()
    }
}

#[async_trait]
impl BlockSource for Transaction {
    async fn get(&self, cid: &Cid) -> ValetResult<Option<Block>> {
        if let Some(block) = self.pending.get(cid) {
            return Ok(Some(block.clone()));
        }
        self.valet.get(cid).await
    }
}

/// Transactional front of a [`Valet`]. Commits are serialized.
pub struct Blockstore {
    valet: Arc<Valet>,
    head: Mutex<Option<Cid>>,
}

impl Blockstore {
    pub fn new(valet: Arc<Valet>) -> Self {
        Self {
            valet,
            head: Mutex::new(None),
        }
    }

    pub fn valet(&self) -> &Arc<Valet> {
        &self.valet
    }

    /// Most recent bundle in the log, if any.
    pub async fn head(&self) -> Option<Cid> {
        *self.head.lock().await
    }

    pub fn begin(&self, label: impl Into<String>) -> Transaction {
        Transaction {
            label: label.into(),
            valet: self.valet.clone(),
            pending: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Commit `tx` and, if given, replace the header of `branch`.
    ///
    /// The bundle holds every pending block plus the header's roots and a
    /// `parent` root. The header is written after the bundle is parked, with
    /// its `bundle` field set to the new log head. Returns the new bundle's
    /// identifier, or `None` when `tx` had no blocks; in that case only the
    /// header is written.
    pub async fn commit(
        &self,
        tx: Transaction,
        header: Option<(&str, Header)>,
    ) -> ValetResult<Option<Cid>> {
        let mut head = self.head.lock().await;
        let label = tx.label.clone();

        if tx.is_empty() {
            if let Some((branch, mut header)) = header {
                header.bundle = *head;
                self.valet.backend().write_header(branch, &header).await?;
                debug!(tx = %label, branch, "header-only commit");
            }
            return Ok(None);
        }

        let blocks = tx.into_blocks();
        let mut writer = BundleWriter::new();
        for block in &blocks {
            writer.add_block(block);
        }
        if let Some((_, header)) = &header {
            for (name, cid) in &header.roots {
                writer.add_root(name.clone(), *cid);
            }
        }
        if let Some(parent) = *head {
            writer.add_root(PARENT_ROOT, parent);
        }
        let ids = writer.block_ids();
        let file = writer.finish()?;

        self.valet.park(file.cid, file.bytes, &ids).await?;
        self.valet.cache_blocks(&blocks)?;
        *head = Some(file.cid);

        if let Some((branch, mut header)) = header {
            header.bundle = Some(file.cid);
            self.valet.backend().write_header(branch, &header).await?;
        }
        info!(tx = %label, bundle = %file.cid.short_hex(), blocks = ids.len(), "transaction committed");
        Ok(Some(file.cid))
    }

    pub async fn load_header(&self, branch: &str) -> ValetResult<Option<Header>> {
        Ok(self.valet.backend().load_header(branch).await?)
    }

    /// Load the header of `branch` and hydrate the valet from its bundle
    /// log. Adopts the header's bundle as the log head if none is set yet.
    pub async fn open_branch(&self, branch: &str) -> ValetResult<Option<Header>> {
        let Some(header) = self.load_header(branch).await? else {
            return Ok(None);
        };
        if let Some(bundle) = header.bundle {
            self.valet.hydrate(bundle).await?;
            let mut head = self.head.lock().await;
            if head.is_none() {
                *head = Some(bundle);
            }
        }
        Ok(Some(header))
    }
}
