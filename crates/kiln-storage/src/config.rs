//! Backend configuration and the factory that turns it into a backend.
//!
//! ```toml
//! readonly = false
//!
//! [backend]
//! kind = "filesystem"
//! data_dir = "/var/lib/kiln"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::fs::FilesystemBackend;
use crate::memory::MemoryBackend;
use crate::remote::RemoteBackend;
use crate::traits::StorageBackend;

/// Which persistence variant to use.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendKind {
    Filesystem {
        #[serde(default = "default_data_dir")]
        data_dir: PathBuf,
    },
    Remote {
        url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Memory,
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::Filesystem {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Turn every write into a no-op.
    #[serde(default)]
    pub readonly: bool,
}

impl StorageConfig {
    pub fn filesystem(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Filesystem {
                data_dir: data_dir.into(),
            },
            readonly: false,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::Remote {
                url: url.into(),
                timeout_secs: default_timeout_secs(),
            },
            readonly: false,
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            readonly: false,
        }
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn from_toml_str(s: &str) -> StorageResult<Self> {
        toml::from_str(s).map_err(|e| StorageError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }
}

/// `$HOME/.kiln/v1`, or `.kiln/v1` relative to the working directory when
/// `HOME` is unset.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".kiln")
        .join("v1")
}

fn default_timeout_secs() -> u64 {
    30
}

/// Build the backend for database `name` described by `config`.
pub fn open_backend(name: &str, config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match &config.backend {
        BackendKind::Filesystem { data_dir } => {
            info!(db = name, data_dir = %data_dir.display(), readonly = config.readonly, "opening filesystem backend");
            Arc::new(FilesystemBackend::new(name, data_dir, config.readonly)?)
        }
        BackendKind::Remote { url, timeout_secs } => {
            info!(db = name, url = %url, readonly = config.readonly, "opening remote backend");
            Arc::new(RemoteBackend::new(
                name,
                url,
                config.readonly,
                Duration::from_secs(*timeout_secs),
            )?)
        }
        BackendKind::Memory => {
            info!(db = name, readonly = config.readonly, "opening memory backend");
            Arc::new(MemoryBackend::new(name, config.readonly)?)
        }
    };
    Ok(backend)
}
