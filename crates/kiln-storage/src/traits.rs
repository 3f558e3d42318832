//! The [`StorageBackend`] trait every persistence variant implements.

use async_trait::async_trait;
use bytes::Bytes;
use kiln_bundle::BundleFile;
use kiln_types::{Cid, Header};

use crate::error::StorageResult;

/// Durable home for one logical database's bundles and branch headers.
///
/// All implementations must satisfy these invariants:
/// - Bundles are immutable. Writing a bundle whose identifier already exists
///   is a no-op.
/// - `write_header` replaces the branch header as a unit: a concurrent
///   `load_header` observes either the previous header or the new one.
/// - `load_header` on a branch that was never written returns `Ok(None)`.
/// - Under read-only configuration, `write_bundles` and `write_header` are
///   no-ops that return `Ok(())`.
/// - I/O errors are always propagated.
///
/// Concurrent writers on the same branch are last-write-wins.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Logical database name this backend is scoped to.
    fn name(&self) -> &str;

    /// Returns `true` if writes are configured as no-ops.
    fn is_read_only(&self) -> bool;

    /// Persist one or more bundles.
    async fn write_bundles(&self, bundles: &[BundleFile]) -> StorageResult<()>;

    /// Read a bundle's raw bytes. Fails with `BundleNotFound` if absent.
    async fn read_bundle(&self, cid: &Cid) -> StorageResult<Bytes>;

    /// Load the header for `branch`, or `None` if it has never been written.
    async fn load_header(&self, branch: &str) -> StorageResult<Option<Header>>;

    /// Atomically replace the header for `branch`.
    async fn write_header(&self, branch: &str, header: &Header) -> StorageResult<()>;
}

/// File/object name of a bundle.
pub(crate) fn bundle_file_name(cid: &Cid) -> String {
    format!("{cid}.{}", crate::BUNDLE_EXTENSION)
}

/// File/object name of a branch header.
pub(crate) fn header_file_name(branch: &str) -> String {
    format!("{branch}.json")
}
