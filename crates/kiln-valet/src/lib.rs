//! Content-addressed block store for Kiln.
//!
//! The [`Valet`] parks immutable bundles in a storage backend and serves the
//! individual blocks inside them. The [`Blockstore`] adds transactions: new
//! blocks are staged in a [`Transaction`], then committed as a single bundle
//! before any header that references them is written.

pub mod blockstore;
pub mod error;
pub mod source;
pub mod upload;
pub mod valet;

pub use blockstore::{Blockstore, Transaction};
pub use error::{ValetError, ValetResult};
pub use source::BlockSource;
pub use upload::{BackendUploader, BundleUploader, ReplicationMode};
pub use valet::{Valet, ValetConfig};

/// Bundle root naming the previous bundle in the log.
pub const PARENT_ROOT: &str = "parent";
