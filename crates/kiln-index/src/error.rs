use kiln_tree::TreeError;
use kiln_types::Clock;
use kiln_valet::ValetError;
use thiserror::Error;

/// Failure raised by a user map function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct MapError(pub String);

impl MapError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors from the change feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The clock does not name any point in this feed's history.
    #[error("unknown clock: {0}")]
    UnknownClock(Clock),

    #[error("feed unavailable: {0}")]
    Unavailable(String),
}

/// Errors from index maintenance and queries.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The map function failed; the update cycle was abandoned.
    #[error("map function failed: {0}")]
    Map(#[from] MapError),

    #[error("change feed error: {0}")]
    Feed(#[from] FeedError),

    /// A key or reference was rejected during comparison.
    #[error("validation error: {0}")]
    Validation(String),

    /// A value cannot be used as, or decoded from, an index key.
    #[error("key error: {0}")]
    Key(String),

    #[error("tree error: {0}")]
    Tree(TreeError),

    #[error("block store error: {0}")]
    Valet(#[from] ValetError),

    /// The index state lock was poisoned by a panicking thread.
    #[error("index state lock poisoned: {0}")]
    Lock(String),
}

impl From<TreeError> for IndexError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::Validation(msg) => Self::Validation(msg),
            TreeError::Valet(e) => Self::Valet(e),
            other => Self::Tree(other),
        }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
