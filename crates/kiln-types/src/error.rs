use thiserror::Error;

/// Errors from parsing identifiers and decoding headers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("cid is not hex: {0}")]
    InvalidHex(String),

    #[error("cid has {actual} bytes, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("header codec: {0}")]
    Serialization(String),
}

pub type TypeResult<T> = Result<T, TypeError>;
