//! Bundle format for Kiln.
//!
//! A bundle is the unit of durable persistence and transfer: an immutable,
//! checksummed container of content-addressed blocks plus zero or more named
//! roots. Bundles are never modified after they are written; updates produce
//! new bundles.
//!
//! - [`BundleWriter`] packages blocks and roots into a [`BundleFile`]
//! - [`BundleReader`] verifies a bundle and extracts blocks by identifier
//! - [`BundleIndex`] is the fan-out lookup table built while reading

pub mod error;
pub mod index;
pub mod reader;
pub mod writer;

pub use error::{BundleError, BundleResult};
pub use index::BundleIndex;
pub use reader::BundleReader;
pub use writer::{BundleFile, BundleWriter};
