//! Merkle search tree for Kiln.
//!
//! An ordered key/value map stored as immutable, content-addressed nodes.
//! Equal entry sets always hash to the same root, so two replicas that
//! indexed the same documents agree on the root regardless of the order
//! they saw changes in.
//!
//! Supported operations: [`MerkleTree::create`], [`MerkleTree::load`],
//! [`MerkleTree::bulk`], [`MerkleTree::range`], [`MerkleTree::get_many`], and
//! [`MerkleTree::entries`].

pub mod error;
pub mod node;
pub mod tree;

pub use error::{TreeError, TreeResult};
pub use node::{Node, TreeConfig, TreeKey, TreeValue};
pub use tree::{BulkResult, MerkleTree, Op, Scan};
