//! Remote HTTP backend.
//!
//! Wire contract:
//! - `PUT {url}/{cid}.bundle` with the bundle bytes and [`BUNDLE_CONTENT_TYPE`]
//! - `GET {url}/{cid}.bundle`
//! - `PUT` / `GET {url}/{branch}.json` for headers
//!
//! Any non-2xx answer is a [`StorageError::Http`] carrying the status text,
//! except `GET` of a header that answers 404, which means the branch has not
//! been written yet.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_bundle::BundleFile;
use kiln_types::{Cid, Header};
use reqwest::{Response, StatusCode};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::names::{validate_branch_name, validate_database_name};
use crate::traits::{bundle_file_name, header_file_name, StorageBackend};

/// Content type sent with bundle uploads.
pub const BUNDLE_CONTENT_TYPE: &str = "application/vnd.kiln.bundle";

/// Stores bundles and headers on a remote HTTP endpoint.
#[derive(Debug, Clone)]
pub struct RemoteBackend {
    name: String,
    base_url: String,
    readonly: bool,
    client: reqwest::Client,
}

impl RemoteBackend {
    /// Create a backend rooted at `base_url`. Trailing slashes are ignored.
    pub fn new(
        name: &str,
        base_url: &str,
        readonly: bool,
        timeout: Duration,
    ) -> StorageResult<Self> {
        validate_database_name(name)?;
        if base_url.is_empty() {
            return Err(StorageError::Config("remote url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            readonly,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url, file_name)
    }
}

/// Map a non-success response to a storage error.
fn check(response: Response) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(StorageError::Http {
        status: status.as_u16(),
        text: status.canonical_reason().unwrap_or("unknown status").to_string(),
    })
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_read_only(&self) -> bool {
        self.readonly
    }

    async fn write_bundles(&self, bundles: &[BundleFile]) -> StorageResult<()> {
        if self.readonly {
            debug!(db = %self.name, count = bundles.len(), "read-only: skipping bundle upload");
            return Ok(());
        }
        for bundle in bundles {
            let url = self.url(&bundle_file_name(&bundle.cid));
            let response = self
                .client
                .put(&url)
                .header(reqwest::header::CONTENT_TYPE, BUNDLE_CONTENT_TYPE)
                .body(bundle.bytes.clone())
                .send()
                .await?;
            check(response)?;
            info!(db = %self.name, url = %url, bytes = bundle.bytes.len(), "bundle uploaded");
        }
        Ok(())
    }

    async fn read_bundle(&self, cid: &Cid) -> StorageResult<Bytes> {
        let url = self.url(&bundle_file_name(cid));
        debug!(db = %self.name, url = %url, "fetching bundle");
        let response = check(self.client.get(&url).send().await?)?;
        Ok(response.bytes().await?)
    }

    async fn load_header(&self, branch: &str) -> StorageResult<Option<Header>> {
        validate_branch_name(branch)?;
        let url = self.url(&header_file_name(branch));
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(db = %self.name, branch, "no remote header");
            return Ok(None);
        }
        let body = check(response)?.bytes().await?;
        Ok(Some(Header::from_json(&body)?))
    }

    async fn write_header(&self, branch: &str, header: &Header) -> StorageResult<()> {
        validate_branch_name(branch)?;
        if self.readonly {
            debug!(db = %self.name, branch, "read-only: skipping header upload");
            return Ok(());
        }
        let url = self.url(&header_file_name(branch));
        let response = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(header.to_json()?)
            .send()
            .await?;
        check(response)?;
        info!(db = %self.name, branch, "header uploaded");
        Ok(())
    }
}
