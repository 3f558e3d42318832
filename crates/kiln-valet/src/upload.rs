//! Optional replication of parked bundles.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_bundle::BundleFile;
use kiln_storage::StorageBackend;
use kiln_types::Cid;

use crate::error::{ValetError, ValetResult};

/// Whether `park` waits for replication to finish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplicationMode {
    /// Await the upload; a failure fails the park.
    #[default]
    Sync,
    /// Spawn the upload on the runtime and log failures.
    Background,
}

/// Receives every bundle the valet parks.
#[async_trait]
pub trait BundleUploader: Send + Sync {
    async fn upload(&self, bundle_id: Cid, bytes: Bytes) -> ValetResult<()>;
}

/// Replicates bundles into a second storage backend, typically a
/// [`kiln_storage::RemoteBackend`] mirroring a local one.
pub struct BackendUploader {
    target: Arc<dyn StorageBackend>,
}

impl BackendUploader {
    pub fn new(target: Arc<dyn StorageBackend>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl BundleUploader for BackendUploader {
    async fn upload(&self, bundle_id: Cid, bytes: Bytes) -> ValetResult<()> {
        let file = BundleFile {
            cid: bundle_id,
            bytes,
        };
        self.target
            .write_bundles(&[file])
            .await
            .map_err(|e| ValetError::Upload {
                bundle: bundle_id,
                reason: e.to_string(),
            })
    }
}
