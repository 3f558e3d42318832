//! The valet: parks bundles and serves individual blocks out of them.
//!
//! Lookup order for [`Valet::get_block`]:
//! 1. the LRU block cache
//! 2. blocks pinned in memory because the backend is read-only
//! 3. the block → bundle reverse index
//! 4. `read_bundle` on the backend, then extraction with [`BundleReader`]
//!
//! Every block of a bundle fetched in step 4 is cached, since callers
//! usually walk neighbouring tree nodes next.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use kiln_bundle::{BundleFile, BundleReader};
use kiln_crypto::Block;
use kiln_storage::StorageBackend;
use kiln_types::Cid;
use lru::LruCache;
use tracing::{debug, info, warn};

use crate::error::{ValetError, ValetResult};
use crate::source::BlockSource;
use crate::upload::{BundleUploader, ReplicationMode};
use crate::PARENT_ROOT;

#[derive(Clone, Debug)]
pub struct ValetConfig {
    /// Maximum number of blocks held in the fast-path cache.
    pub cache_capacity: usize,
    pub replication: ReplicationMode,
}

impl Default for ValetConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            replication: ReplicationMode::Sync,
        }
    }
}

/// Content-addressed block store layered over a [`StorageBackend`].
pub struct Valet {
    backend: Arc<dyn StorageBackend>,
    owners: RwLock<HashMap<Cid, Cid>>,
    /// Blocks of bundles a read-only backend never stored. Never evicted.
    pinned: RwLock<HashMap<Cid, Block>>,
    cache: Mutex<LruCache<Cid, Block>>,
    uploader: Option<Arc<dyn BundleUploader>>,
    replication: ReplicationMode,
}

fn poisoned<E: std::fmt::Display>(e: E) -> ValetError {
    ValetError::Lock(e.to_string())
}

impl Valet {
    pub fn new(backend: Arc<dyn StorageBackend>, config: ValetConfig) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            owners: RwLock::new(HashMap::new()),
            pinned: RwLock::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(capacity)),
            uploader: None,
            replication: config.replication,
        }
    }

    /// Replicate every parked bundle through `uploader`.
    pub fn with_uploader(mut self, uploader: Arc<dyn BundleUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Persist a bundle, record which blocks it holds, and replicate it.
    ///
    /// A block already owned by an older bundle is reassigned to this one.
    /// On a read-only backend the bundle is not stored, so its blocks are
    /// pinned in memory instead of being recorded as owned.
    pub async fn park(&self, bundle_id: Cid, bytes: Bytes, block_ids: &[Cid]) -> ValetResult<()> {
        let file = BundleFile {
            cid: bundle_id,
            bytes,
        };
        if self.backend.is_read_only() {
            let blocks = BundleReader::from_bytes(file.bytes.clone())?.blocks()?;
            let wanted: HashSet<&Cid> = block_ids.iter().collect();
            let mut pinned = self.pinned.write().map_err(poisoned)?;
            for block in blocks {
                if wanted.contains(block.cid()) {
                    pinned.insert(*block.cid(), block);
                }
            }
            debug!(
                db = self.backend.name(),
                bundle = %bundle_id.short_hex(),
                pinned = pinned.len(),
                "read-only backend, bundle blocks pinned in memory"
            );
        } else {
            self.backend.write_bundles(std::slice::from_ref(&file)).await?;
            let mut owners = self.owners.write().map_err(poisoned)?;
            for id in block_ids {
                owners.insert(*id, bundle_id);
            }
        }
        info!(
            db = self.backend.name(),
            bundle = %bundle_id.short_hex(),
            blocks = block_ids.len(),
            bytes = file.bytes.len(),
            "bundle parked"
        );

        let Some(uploader) = self.uploader.clone() else {
            return Ok(());
        };
        match self.replication {
            ReplicationMode::Sync => uploader.upload(bundle_id, file.bytes).await,
            ReplicationMode::Background => {
                tokio::spawn(async move {
                    if let Err(e) = uploader.upload(bundle_id, file.bytes).await {
                        warn!(bundle = %bundle_id.short_hex(), error = %e, "background upload failed");
                    }
                });
                Ok(())
            }
        }
    }

    /// Fetch one block by identifier.
    pub async fn get_block(&self, cid: &Cid) -> ValetResult<Block> {
        if let Some(block) = self.cache.lock().map_err(poisoned)?.get(cid).cloned() {
            return Ok(block);
        }
        if let Some(block) = self.pinned.read().map_err(poisoned)?.get(cid).cloned() {
            return Ok(block);
        }

        let owner = self
            .get_bundle_id_for_block(cid)?
            .ok_or(ValetError::NotFound(*cid))?;
        debug!(block = %cid.short_hex(), bundle = %owner.short_hex(), "loading block from bundle");
        let bytes = self.backend.read_bundle(&owner).await?;
        let blocks = BundleReader::from_bytes(bytes)?.blocks()?;

        let found = blocks.iter().find(|b| b.cid() == cid).cloned();
        self.cache_blocks(&blocks)?;
        found.ok_or_else(|| {
            warn!(block = %cid.short_hex(), bundle = %owner.short_hex(), "owning bundle lacks block");
            ValetError::NotFound(*cid)
        })
    }

    /// The bundle that most recently claimed `cid`, if any.
    pub fn get_bundle_id_for_block(&self, cid: &Cid) -> ValetResult<Option<Cid>> {
        Ok(self.owners.read().map_err(poisoned)?.get(cid).copied())
    }

    /// Put blocks into the fast-path cache.
    pub fn cache_blocks(&self, blocks: &[Block]) -> ValetResult<()> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        for block in blocks {
            cache.put(*block.cid(), block.clone());
        }
        Ok(())
    }

    /// Rebuild the reverse index by walking the bundle log backwards from
    /// `head`, following each bundle's `parent` root.
    ///
    /// Entries recorded before this call, and entries from newer bundles in
    /// the log, are kept. Returns the number of bundles visited.
    pub async fn hydrate(&self, head: Cid) -> ValetResult<usize> {
        let mut visited = HashSet::new();
        let mut next = Some(head);
        while let Some(bundle_id) = next {
            if !visited.insert(bundle_id) {
                break;
            }
            let reader = BundleReader::from_bytes(self.backend.read_bundle(&bundle_id).await?)?;
            {
                let mut owners = self.owners.write().map_err(poisoned)?;
                for id in reader.block_ids() {
                    owners.entry(*id).or_insert(bundle_id);
                }
            }
            next = reader.root(PARENT_ROOT);
        }
        debug!(head = %head.short_hex(), bundles = visited.len(), "valet hydrated");
        Ok(visited.len())
    }
}

#[async_trait]
impl BlockSource for Valet {
    async fn get(&self, cid: &Cid) -> ValetResult<Option<Block>> {
        match self.get_block(cid).await {
            Ok(block) => Ok(Some(block)),
            Err(ValetError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bundle::BundleWriter;
    use kiln_storage::{FilesystemBackend, MemoryBackend, StorageError};

    struct Recorder {
        calls: Mutex<Vec<Cid>>,
    }

    #[async_trait]
    impl BundleUploader for Recorder {
        async fn upload(&self, bundle_id: Cid, _bytes: Bytes) -> ValetResult<()> {
            self.calls.lock().unwrap().push(bundle_id);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl BundleUploader for Failing {
        async fn upload(&self, bundle_id: Cid, _bytes: Bytes) -> ValetResult<()> {
            Err(ValetError::Upload {
                bundle: bundle_id,
                reason: "offline".into(),
            })
        }
    }

    fn memory_valet() -> Valet {
        Valet::new(
            Arc::new(MemoryBackend::new("test", false).unwrap()),
            ValetConfig::default(),
        )
    }

    fn bundle_of(blocks: &[Block]) -> BundleFile {
        let mut writer = BundleWriter::new();
        for b in blocks {
            writer.add_block(b);
        }
        writer.finish().unwrap()
    }

    fn block(content: &str) -> Block {
        Block::from_bytes(content.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn park_then_serve_blocks() {
        let recorder = Arc::new(Recorder {
            calls: Mutex::new(Vec::new()),
        });
        let valet = memory_valet().with_uploader(recorder.clone());
        let blocks = [block("first"), block(&"x".repeat(300))];
        let file = bundle_of(&blocks);
        let ids: Vec<Cid> = blocks.iter().map(|b| *b.cid()).collect();

        valet.park(file.cid, file.bytes.clone(), &ids).await.unwrap();

        let served = valet.get_block(blocks[1].cid()).await.unwrap();
        assert_eq!(served.len(), 300);
        assert_eq!(
            valet.get_bundle_id_for_block(blocks[1].cid()).unwrap(),
            Some(file.cid)
        );
        assert_eq!(*recorder.calls.lock().unwrap(), vec![file.cid]);
    }

    #[tokio::test]
    async fn serves_from_backend_when_cache_is_cold() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new("db", dir.path(), false).unwrap());
        let valet = Valet::new(
            backend,
            ValetConfig {
                cache_capacity: 1,
                ..ValetConfig::default()
            },
        );
        let blocks = [block("a"), block("b"), block("c")];
        let file = bundle_of(&blocks);
        let ids: Vec<Cid> = blocks.iter().map(|b| *b.cid()).collect();
        valet.park(file.cid, file.bytes, &ids).await.unwrap();

        for b in &blocks {
            assert_eq!(&valet.get_block(b.cid()).await.unwrap(), b);
        }
    }

    #[tokio::test]
    async fn unknown_block_is_not_found() {
        let valet = memory_valet();
        let cid = Cid::from_bytes(b"never parked");
        assert!(matches!(
            valet.get_block(&cid).await,
            Err(ValetError::NotFound(c)) if c == cid
        ));
        assert_eq!(valet.get_bundle_id_for_block(&cid).unwrap(), None);
        assert!(valet.get(&cid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_bundle_is_storage_error() {
        let valet = memory_valet();
        let b = block("orphan");
        {
            let mut owners = valet.owners.write().unwrap();
            owners.insert(*b.cid(), Cid::from_bytes(b"lost bundle"));
        }
        assert!(matches!(
            valet.get_block(b.cid()).await,
            Err(ValetError::Storage(StorageError::BundleNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn later_park_wins_ownership() {
        let valet = memory_valet();
        let shared = block("shared");
        let first = bundle_of(&[shared.clone(), block("one")]);
        let second = bundle_of(&[shared.clone(), block("two")]);

        valet.park(first.cid, first.bytes, &[*shared.cid()]).await.unwrap();
        valet.park(second.cid, second.bytes, &[*shared.cid()]).await.unwrap();
        assert_eq!(
            valet.get_bundle_id_for_block(shared.cid()).unwrap(),
            Some(second.cid)
        );
    }

    #[tokio::test]
    async fn sync_upload_failure_fails_park() {
        let valet = memory_valet().with_uploader(Arc::new(Failing));
        let file = bundle_of(&[block("a")]);
        let err = valet.park(file.cid, file.bytes, &[]).await.unwrap_err();
        assert!(matches!(err, ValetError::Upload { .. }));
    }

    #[tokio::test]
    async fn background_upload_failure_is_logged_only() {
        let valet = Valet::new(
            Arc::new(MemoryBackend::new("test", false).unwrap()),
            ValetConfig {
                replication: ReplicationMode::Background,
                ..ValetConfig::default()
            },
        )
        .with_uploader(Arc::new(Failing));
        let b = block("a");
        let file = bundle_of(&[b.clone()]);
        valet.park(file.cid, file.bytes, &[*b.cid()]).await.unwrap();
        assert_eq!(valet.get_block(b.cid()).await.unwrap(), b);
    }

    #[tokio::test]
    async fn hydrate_follows_parent_roots() {
        let backend = Arc::new(MemoryBackend::new("db", false).unwrap());
        let old = block("old");
        let new = block("new");

        let mut writer = BundleWriter::new();
        writer.add_block(&old);
        let first = writer.finish().unwrap();
        let mut writer = BundleWriter::new();
        writer.add_block(&new);
        writer.add_root(PARENT_ROOT, first.cid);
        let second = writer.finish().unwrap();
        backend
            .write_bundles(&[first.clone(), second.clone()])
            .await
            .unwrap();

        let valet = Valet::new(backend, ValetConfig::default());
        assert_eq!(valet.hydrate(second.cid).await.unwrap(), 2);
        assert_eq!(valet.get_bundle_id_for_block(old.cid()).unwrap(), Some(first.cid));
        assert_eq!(valet.get_bundle_id_for_block(new.cid()).unwrap(), Some(second.cid));
        assert_eq!(valet.get_block(old.cid()).await.unwrap(), old);
    }

    #[tokio::test]
    async fn read_only_park_pins_blocks_past_cache_eviction() {
        let backend = Arc::new(MemoryBackend::new("db", true).unwrap());
        let valet = Valet::new(
            backend.clone(),
            ValetConfig {
                cache_capacity: 1,
                ..ValetConfig::default()
            },
        );
        let blocks = [block("a"), block("b"), block("c")];
        let file = bundle_of(&blocks);
        let ids: Vec<Cid> = blocks.iter().map(|b| *b.cid()).collect();
        valet.park(file.cid, file.bytes, &ids).await.unwrap();
        valet.cache_blocks(&[block("unrelated")]).unwrap();

        assert_eq!(backend.bundle_count(), 0);
        assert_eq!(valet.get_bundle_id_for_block(blocks[0].cid()).unwrap(), None);
        for b in &blocks {
            assert_eq!(&valet.get_block(b.cid()).await.unwrap(), b);
        }
    }
}
