//! Local filesystem backend.
//!
//! Layout:
//! ```text
//! {data_dir}/{database}/{bundle cid}.bundle
//! {data_dir}/{database}/{branch}.json
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use kiln_bundle::BundleFile;
use kiln_types::{Cid, Header};
use tokio::fs;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::names::{validate_branch_name, validate_database_name};
use crate::traits::{bundle_file_name, header_file_name, StorageBackend};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Stores one database as a directory of bundle files and header files.
#[derive(Debug)]
pub struct FilesystemBackend {
    name: String,
    dir: PathBuf,
    readonly: bool,
}

impl FilesystemBackend {
    /// Create a backend for database `name` under `data_dir`. No I/O happens
    /// until the first write.
    pub fn new(name: &str, data_dir: impl AsRef<Path>, readonly: bool) -> StorageResult<Self> {
        validate_database_name(name)?;
        Ok(Self {
            name: name.to_string(),
            dir: data_dir.as_ref().join(name),
            readonly,
        })
    }

    /// Directory holding this database's files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn bundle_path(&self, cid: &Cid) -> PathBuf {
        self.dir.join(bundle_file_name(cid))
    }

    fn header_path(&self, branch: &str) -> PathBuf {
        self.dir.join(header_file_name(branch))
    }

    /// Write `data` to `path` through a sibling temp file and a rename, so
    /// readers never observe a partially written file.
    async fn replace_file(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
        fs::create_dir_all(&self.dir).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = self.dir.join(format!(
            ".{file_name}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, data).await?;
        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.readonly
    }

    async fn write_bundles(&self, bundles: &[BundleFile]) -> StorageResult<()> {
        if self.readonly {
            debug!(db = %self.name, count = bundles.len(), "read-only: skipping bundle write");
            return Ok(());
        }
        for bundle in bundles {
            let path = self.bundle_path(&bundle.cid);
            if fs::try_exists(&path).await? {
                continue;
            }
            self.replace_file(&path, &bundle.bytes).await?;
            debug!(db = %self.name, bundle = %bundle.cid.short_hex(), bytes = bundle.bytes.len(), "bundle written");
        }
        Ok(())
    }

    async fn read_bundle(&self, cid: &Cid) -> StorageResult<Bytes> {
        match fs::read(self.bundle_path(cid)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::BundleNotFound(*cid)),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_header(&self, branch: &str) -> StorageResult<Option<Header>> {
        validate_branch_name(branch)?;
        match fs::read(self.header_path(branch)).await {
            Ok(data) => Ok(Some(Header::from_json(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_header(&self, branch: &str, header: &Header) -> StorageResult<()> {
        validate_branch_name(branch)?;
        if self.readonly {
            debug!(db = %self.name, branch, "read-only: skipping header write");
            return Ok(());
        }
        let data = header.to_json()?;
        self.replace_file(&self.header_path(branch), &data).await?;
        debug!(db = %self.name, branch, "header written");
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
    async fn header_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new("db", dir.path(), false).unwrap();
        let header = Header::new().with_root("index", Cid::from_bytes(b"root"));

        backend.write_header("main", &header).await.unwrap();
        assert_eq!(backend.load_header("main").await.unwrap(), Some(header));
        assert!(dir.path().join("db").join("main.json").exists());
    }

    #[tokio::test]
    async fn missing_header_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new("db", dir.path(), false).unwrap();
        assert_eq!(backend.load_header("main").await.unwrap(), None);
    }

    #[tokio::test]
    async fn header_replace_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new("db", dir.path(), false).unwrap();
        for i in 0..3u8 {
            let header = Header::new().with_root("index", Cid::from_hash([i; 32]));
            backend.write_header("main", &header).await.unwrap();
        }
        let names: Vec<String> = std::fs::read_dir(backend.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["main.json".to_string()]);
        let loaded = backend.load_header("main").await.unwrap().unwrap();
        assert_eq!(loaded.root("index"), Some(Cid::from_hash([2; 32])));
    }

    #[tokio::test]
    async fn bundle_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new("db", dir.path(), false).unwrap();
        let file = bundle("hello");

        backend.write_bundles(&[file.clone()]).await.unwrap();
        assert_eq!(backend.read_bundle(&file.cid).await.unwrap(), file.bytes);
        assert!(dir
            .path()
            .join("db")
            .join(format!("{}.bundle", file.cid))
            .exists());
    }

    #[tokio::test]
    async fn missing_bundle_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new("db", dir.path(), false).unwrap();
        let cid = Cid::from_bytes(b"nope");
        let err = backend.read_bundle(&cid).await.unwrap_err();
        assert!(matches!(err, StorageError::BundleNotFound(c) if c == cid));
    }

    #[tokio::test]
    async fn read_only_writes_are_noops() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new("db", dir.path(), true).unwrap();
        let file = bundle("ignored");

        backend.write_bundles(&[file.clone()]).await.unwrap();
        backend.write_header("main", &Header::new()).await.unwrap();

        assert!(!backend.dir().exists());
        assert_eq!(backend.load_header("main").await.unwrap(), None);
        assert!(backend.read_bundle(&file.cid).await.is_err());
    }

    #[tokio::test]
    async fn invalid_branch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new("db", dir.path(), false).unwrap();
        let err = backend.load_header("../etc").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidName { kind: "branch", .. }));
    }
}
