//! IdP metadata fetching and caching.
//!
//! The current snapshot lives behind an [`ArcSwapOption`]: readers take a
//! cheap `Arc` clone and never block, a refresh swaps in a fully parsed
//! replacement, and a failed refresh leaves the previous snapshot in place.

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::idp::IdpMetadata;
use crate::error::MetadataError;

/// Where IdP metadata comes from.
#[derive(Debug, Clone)]
pub enum MetadataSource {
    /// Fetched over HTTP(S).
    Url(String),
    /// Supplied inline (configuration or tests).
    Inline(String),
}

/// Process-wide, read-mostly IdP metadata.
pub struct MetadataStore {
    current: ArcSwapOption<IdpMetadata>,
    source: MetadataSource,
    /// HTTP client
    http_client: reqwest::Client,
}

impl MetadataStore {
    /// Create an empty store. Call [`refresh`](Self::refresh) before use.
    pub fn new(source: MetadataSource, fetch_timeout: Duration) -> Result<Self, MetadataError> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| MetadataError::Fetch(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            current: ArcSwapOption::empty(),
            source,
            http_client,
        })
    }

    /// A store holding a fixed snapshot.
    pub fn with_metadata(metadata: IdpMetadata) -> Self {
        let store = Self {
            current: ArcSwapOption::empty(),
            source: MetadataSource::Inline(String::new()),
            http_client: reqwest::Client::new(),
        };
        store.install(metadata);
        store
    }

    /// Fetch and parse the metadata at `url` without installing it.
    ///
    /// One attempt, bounded by the client timeout.
    pub async fn fetch(&self, url: &str) -> Result<IdpMetadata, MetadataError> {
        debug!(url = %url, "Fetching IdP metadata");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| MetadataError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MetadataError::Fetch(format!(
                "metadata endpoint returned status {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| MetadataError::Fetch(e.to_string()))?;

        IdpMetadata::parse(&body)
    }

    /// Current snapshot.
    pub fn current(&self) -> Result<Arc<IdpMetadata>, MetadataError> {
        self.current.load_full().ok_or(MetadataError::NotInitialized)
    }

    /// Replace the snapshot.
    pub fn install(&self, metadata: IdpMetadata) -> Arc<IdpMetadata> {
        let metadata = Arc::new(metadata);
        self.current.store(Some(Arc::clone(&metadata)));
        metadata
    }

    /// Reload from the configured source and install the result.
    ///
    /// On failure the previous snapshot, if any, stays in effect.
    pub async fn refresh(&self) -> Result<Arc<IdpMetadata>, MetadataError> {
        let metadata = match &self.source {
            MetadataSource::Url(url) => self.fetch(url).await?,
            MetadataSource::Inline(xml) => IdpMetadata::parse(xml)?,
        };

        let installed = self.install(metadata);
        info!(
            entity_id = %installed.entity_id,
            certificates = installed.certificates.len(),
            "IdP metadata refreshed"
        );
        Ok(installed)
    }
}

/// Spawn a background task that periodically refreshes IdP metadata.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_refresh_task(
    store: Arc<MetadataStore>,
    refresh_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(refresh_interval_secs.max(1)));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if let Err(e) = store.refresh().await {
                warn!(
                    error = %e,
                    kind = "TransientNetworkError",
                    "IdP metadata refresh failed, keeping previous snapshot"
                );
            }
        }
    })
}
