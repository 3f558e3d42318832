use async_trait::async_trait;
use kiln_crypto::Block;
use kiln_types::Cid;

use crate::error::ValetResult;

/// Anything blocks can be read from.
///
/// Returns `Ok(None)` when the block is unknown and `Err` when looking it
/// up failed.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn get(&self, cid: &Cid) -> ValetResult<Option<Block>>;
}
