use kiln_types::Cid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid bundle magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported bundle version: {0}")]
    UnsupportedVersion(u32),

    #[error("bundle checksum mismatch")]
    ChecksumMismatch,

    #[error("corrupt bundle entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("CRC32 mismatch for block {id}")]
    CrcMismatch { id: Cid },

    #[error("block {id} does not match its identifier")]
    HashMismatch { id: Cid },

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("compression failed: {0}")]
    CompressionFailed(String),
}

pub type BundleResult<T> = Result<T, BundleError>;
