use kiln_crypto::HasherError;
use kiln_types::Cid;
use kiln_valet::ValetError;
use thiserror::Error;

/// Errors from tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// A key comparison rejected its operands.
    #[error("validation error: {0}")]
    Validation(String),

    /// A node referenced by the tree could not be resolved.
    #[error("missing tree node: {0}")]
    MissingNode(Cid),

    #[error("block store error: {0}")]
    Valet(#[from] ValetError),

    #[error("node codec error: {0}")]
    Codec(#[from] HasherError),
}

pub type TreeResult<T> = Result<T, TreeError>;
