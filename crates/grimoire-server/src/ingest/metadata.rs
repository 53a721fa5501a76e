//! Bulk-data discovery
//!
//! Resolves a [`SyncType`] to the latest published export via
//! `GET <catalog>/bulk-data/<type>`. No retries happen here; a failed lookup turns
//! into a failed sync and the next trigger tries again.
//!
//! The shared client carries only connect and idle-read timeouts so multi-gigabyte
//! downloads are never cut off by a wall-clock limit. Metadata lookups add their own
//! whole-request timeout.

use std::time::Duration;

use async_trait::async_trait;
use grimoire_common::SyncType;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Result, SyncConfig, SyncError};

/// Remote descriptor of the latest export for one sync type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkMetadata {
    /// Opaque version; the catalog's `updated_at` timestamp
    #[serde(rename = "updated_at")]
    pub version: String,
    pub download_uri: String,
    /// Size of the export in bytes
    pub size: i64,
}

/// Source of bulk metadata
#[async_trait]
pub trait BulkMetadataSource: Send + Sync {
    /// `Ok(None)` when the catalog publishes nothing for `sync_type`
    async fn fetch(&self, sync_type: SyncType) -> Result<Option<BulkMetadata>>;
}

/// Build the HTTP client shared by discovery and downloads
pub fn http_client(config: &SyncConfig) -> Result<Client> {
    Ok(Client::builder()
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.http_timeout())
        .user_agent(&config.user_agent)
        .build()?)
}

/// HTTP client for the catalog's bulk-data endpoint
#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl CatalogClient {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Ok(Self::new(http_client(config)?, config.catalog_url.clone())
            .with_request_timeout(config.http_timeout()))
    }

    fn url_for(&self, sync_type: SyncType) -> String {
        format!("{}/bulk-data/{}", self.base_url, sync_type.as_str())
    }
}

#[async_trait]
impl BulkMetadataSource for CatalogClient {
    async fn fetch(&self, sync_type: SyncType) -> Result<Option<BulkMetadata>> {
        let url = self.url_for(sync_type);
        debug!(%sync_type, %url, "Fetching bulk metadata");

        let mut request = self.client.get(&url);
        if let Some(timeout) = self.request_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }

        let metadata: BulkMetadata = response.json().await?;
        info!(
            %sync_type,
            version = %metadata.version,
            size = metadata.size,
            "Resolved bulk metadata"
        );

        Ok(Some(metadata))
    }
}
