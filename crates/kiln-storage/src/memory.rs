//! Embedded in-process backend.
//!
//! [`MemoryBackend`] keeps bundles and headers in `HashMap`s behind
//! `RwLock`s. Data is lost when the backend is dropped. Useful for tests,
//! REPL sessions, and short-lived processes.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_bundle::BundleFile;
use kiln_types::{Cid, Header};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::names::{validate_branch_name, validate_database_name};
use crate::traits::StorageBackend;

#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    readonly: bool,
    bundles: RwLock<HashMap<Cid, Bytes>>,
    headers: RwLock<HashMap<String, Header>>,
}

impl MemoryBackend {
    pub fn new(name: &str, readonly: bool) -> StorageResult<Self> {
        validate_database_name(name)?;
        Ok(Self {
            name: name.to_string(),
            readonly,
            bundles: RwLock::new(HashMap::new()),
            headers: RwLock::new(HashMap::new()),
        })
    }

    /// Number of bundles held.
    pub fn bundle_count(&self) -> usize {
        self.bundles.read().map(|b| b.len()).unwrap_or(0)
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(format!("lock poisoned: {e}"))
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.readonly
    }

    async fn write_bundles(&self, files: &[BundleFile]) -> StorageResult<()> {
        if self.readonly {
            debug!(db = %self.name, count = files.len(), "read-only: skipping bundle write");
            return Ok(());
        }
        let mut bundles = self.bundles.write().map_err(poisoned)?;
        for file in files {
            bundles
                .entry(file.cid)
                .or_insert_with(|| file.bytes.clone());
        }
        Ok(())
    }

    async fn read_bundle(&self, cid: &Cid) -> StorageResult<Bytes> {
        let bundles = self.bundles.read().map_err(poisoned)?;
        bundles
            .get(cid)
            .cloned()
            .ok_or(StorageError::BundleNotFound(*cid))
    }

    async fn load_header(&self, branch: &str) -> StorageResult<Option<Header>> {
        validate_branch_name(branch)?;
        let headers = self.headers.read().map_err(poisoned)?;
        Ok(headers.get(branch).cloned())
    }

    async fn write_header(&self, branch: &str, header: &Header) -> StorageResult<()> {
        validate_branch_name(branch)?;
        if self.readonly {
            debug!(db = %self.name, branch, "read-only: skipping header write");
            return Ok(());
        }
        let mut headers = self.headers.write().map_err(poisoned)?;
        headers.insert(branch.to_string(), header.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bundle::BundleWriter;
    use kiln_crypto::Block;

    fn bundle(content: &str) -> BundleFile {
        let mut writer = BundleWriter::new();
        writer.add_block(&Block::from_bytes(content.as_bytes().to_vec()));
        writer.finish().unwrap()
    }

    #[tokio::test]
    async fn bundle_roundtrip() {
        let backend = MemoryBackend::new("db", false).unwrap();
        let file = bundle("a");
        backend.write_bundles(&[file.clone()]).await.unwrap();
        assert_eq!(backend.read_bundle(&file.cid).await.unwrap(), file.bytes);
    }

    #[tokio::test]
    async fn duplicate_bundle_is_stored_once() {
        let backend = MemoryBackend::new("db", false).unwrap();
        let file = bundle("a");
        backend.write_bundles(&[file.clone(), file.clone()]).await.unwrap();
        backend.write_bundles(&[file]).await.unwrap();
        assert_eq!(backend.bundle_count(), 1);
    }

    #[tokio::test]
    async fn headers_are_per_branch() {
        let backend = MemoryBackend::new("db", false).unwrap();
        let main = Header::new().with_root("index", Cid::from_bytes(b"m"));
        let dev = Header::new().with_root("index", Cid::from_bytes(b"d"));
        backend.write_header("main", &main).await.unwrap();
        backend.write_header("dev", &dev).await.unwrap();

        assert_eq!(backend.load_header("main").await.unwrap(), Some(main));
        assert_eq!(backend.load_header("dev").await.unwrap(), Some(dev));
        assert_eq!(backend.load_header("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_only_drops_writes() {
        let backend = MemoryBackend::new("db", true).unwrap();
        let file = bundle("a");
        backend.write_bundles(&[file.clone()]).await.unwrap();
        backend.write_header("main", &Header::new()).await.unwrap();
        assert_eq!(backend.bundle_count(), 0);
        assert!(matches!(
            backend.read_bundle(&file.cid).await,
            Err(StorageError::BundleNotFound(_))
        ));
        assert_eq!(backend.load_header("main").await.unwrap(), None);
    }
}
