use kiln_bundle::BundleError;
use kiln_crypto::HasherError;
use kiln_storage::StorageError;
use kiln_types::Cid;
use thiserror::Error;

/// Errors from the block store.
#[derive(Debug, Error)]
pub enum ValetError {
    /// No parked bundle holds this block.
    #[error("block not found: {0}")]
    NotFound(Cid),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("bundle error: {0}")]
    Bundle(#[from] BundleError),

    #[error("block codec error: {0}")]
    Codec(#[from] HasherError),

    /// Replication through the configured uploader failed.
    #[error("upload of bundle {bundle} failed: {reason}")]
    Upload { bundle: Cid, reason: String },

    #[error("lock poisoned: {0}")]
    Lock(String),
}

pub type ValetResult<T> = Result<T, ValetError>;
