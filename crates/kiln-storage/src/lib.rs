//! Storage backends for Kiln.
//!
//! A backend is the durable home of one logical database: a set of
//! immutable bundles plus one small mutable header per branch. Three
//! variants implement [`StorageBackend`]:
//!
//! - [`FilesystemBackend`]: a directory per database
//! - [`RemoteBackend`]: an HTTP endpoint accepting `PUT`/`GET`
//! - [`MemoryBackend`]: embedded, in-process
//!
//! [`open_backend`] picks one from an explicit [`StorageConfig`].

pub mod config;
pub mod error;
pub mod fs;
pub mod memory;
pub mod names;
pub mod remote;
pub mod traits;

pub use config::{default_data_dir, open_backend, BackendKind, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use fs::FilesystemBackend;
pub use memory::MemoryBackend;
pub use remote::{RemoteBackend, BUNDLE_CONTENT_TYPE};
pub use traits::StorageBackend;

/// File extension of stored bundles.
pub const BUNDLE_EXTENSION: &str = "bundle";
