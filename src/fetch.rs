//! HTTP fetcher for authoritative entity collections.
//!
//! Every request carries cache-defeating headers so intermediaries never
//! serve a stale collection, and the cookie jar is enabled so the CRM
//! session cookie rides along.

use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use url::Url;

use crate::config::Config;
use crate::entities::SyncEntity;
use crate::error::{Result, SyncError};

/// REST API client for collection endpoints.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: Url,
}

impl ApiClient {
  pub fn new(config: &Config) -> Result<Self> {
    let mut headers = HeaderMap::new();
    headers.insert(
      CACHE_CONTROL,
      HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .cookie_store(true)
      .build()
      .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;

    let base_url = Url::parse(&config.api.base_url)
      .map_err(|e| SyncError::Config(format!("invalid API base URL: {}", e)))?;

    Ok(Self { http, base_url })
  }

  /// Fetch the full authoritative collection for an entity type.
  ///
  /// Non-2xx responses become [`SyncError::Network`] carrying the status
  /// code; a malformed body becomes [`SyncError::Parse`].
  pub async fn fetch_collection<T: SyncEntity>(&self) -> Result<Vec<T>> {
    let url = self
      .base_url
      .join(T::collection_path())
      .map_err(|e| SyncError::Config(format!("invalid collection path: {}", e)))?;

    tracing::debug!(entity_type = T::entity_type(), %url, "fetching collection");

    let response = self
      .http
      .get(url.clone())
      .send()
      .await
      .map_err(|e| SyncError::Network {
        status: e.status().map(|s| s.as_u16()),
        message: format!("GET {} failed: {}", url, e),
      })?;

    let status = response.status();
    if !status.is_success() {
      return Err(SyncError::Network {
        status: Some(status.as_u16()),
        message: format!("GET {} returned {}", url, status),
      });
    }

    let body = response.text().await.map_err(|e| SyncError::Network {
      status: None,
      message: format!("failed to read response body from {}: {}", url, e),
    })?;

    let collection: Vec<T> = serde_json::from_str(&body)?;
    Ok(collection)
  }
}
