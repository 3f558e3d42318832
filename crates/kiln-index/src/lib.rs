//! Incremental secondary indexes for Kiln.
//!
//! A [`DbIndex`] applies a user [`MapFn`] to every document in a
//! [`ChangeFeed`] and keeps the emitted `(key, value)` pairs in a Merkle
//! search tree. Keys are stored in an order-preserving byte encoding
//! ([`KeyValue::encode`]), so range queries over mixed key types return rows
//! in logical order.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kiln_index::{DbIndex, Document, Emitter, IndexConfig, InMemoryFeed, KeyValue, MapError, Query};
//! use kiln_storage::MemoryBackend;
//! use kiln_valet::{Blockstore, Valet, ValetConfig};
//! use serde_json::{json, Value};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let feed = Arc::new(InMemoryFeed::new());
//! feed.put("1", json!({"title": "abc"}))?;
//!
//! let backend = Arc::new(MemoryBackend::new("db", false)?);
//! let blocks = Arc::new(Blockstore::new(Arc::new(Valet::new(backend, ValetConfig::default()))));
//! let index = DbIndex::new(
//!     IndexConfig::new("by-length"),
//!     feed,
//!     blocks,
//!     Arc::new(|doc: &Document, emit: &mut Emitter| -> Result<(), MapError> {
//!         if let Some(title) = doc.get("title").and_then(Value::as_str) {
//!             emit.emit(title.len(), json!(title));
//!         }
//!         Ok(())
//!     }),
//! );
//! let rows = index.query(Query::Key(KeyValue::from(3))).await?.rows;
//! assert_eq!(rows[0].id, "1");
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod error;
pub mod feed;
pub mod index;
pub mod keys;

pub use entry::{compare_refs, Document, Emitter, IndexKey, MapFn, RowRef};
pub use error::{FeedError, IndexError, IndexResult, MapError};
pub use feed::{ChangeFeed, InMemoryFeed};
pub use index::{
    DbIndex, IndexConfig, IndexState, Proof, Query, QueryResponse, RebuildMode, Row, PRIMARY_ROOT,
    SHADOW_ROOT,
};
pub use keys::{EncodedKey, KeyValue};
