//! Foundation types for Kiln.
//!
//! Every other Kiln crate depends on `kiln-types`.
//!
//! # Key Types
//!
//! - [`Cid`]: content identifier (BLAKE3 hash) naming blocks and bundles
//! - [`Clock`]: opaque cursor over the document change history
//! - [`Change`] / [`ChangeSet`]: rows produced by the change feed
//! - [`Header`]: per-branch record of committed root pointers

pub mod change;
pub mod cid;
pub mod clock;
pub mod error;
pub mod header;

pub use change::{Change, ChangeSet};
pub use cid::Cid;
pub use clock::Clock;
pub use error::{TypeError, TypeResult};
pub use header::{Header, MAIN_BRANCH};
