use anyhow::{Context, Result};
use common::ScholarConfig;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{RawRecord, ScholarPaper, SourceAdapter};
use crate::models::SourceKind;

pub const DEFAULT_API_URL: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
const FIELDS: &str = "title,abstract,url,authors,year";

/// Academic search through the Semantic Scholar graph API.
///
/// Upstream usage policy asks for paced access: consecutive search requests are at least
/// `request_delay` apart, and so are consecutive records of one response.
pub struct ScholarSource {
    client: Client,
    api_url: String,
    request_delay: Duration,
    enabled: bool,
    last_request: Mutex<Option<Instant>>,
}

impl ScholarSource {
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            request_delay: Duration::from_secs(1),
            enabled: true,
            last_request: Mutex::new(None),
        }
    }

    pub fn from_config(client: Client, config: &ScholarConfig) -> Self {
        let mut source = Self::new(
            client,
            config.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        );
        if let Some(ms) = config.request_delay_ms {
            source.request_delay = Duration::from_millis(ms);
        }
        source.enabled = config.enabled.unwrap_or(true);
        source
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Wait until `request_delay` has passed since the previous search request.
    async fn wait_for_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.request_delay {
                tokio::time::sleep(self.request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<ScholarPaper>,
}

#[async_trait::async_trait]
impl SourceAdapter for ScholarSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Scholar
    }

    fn is_available(&self) -> bool {
        self.enabled && !self.api_url.trim().is_empty()
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawRecord>> {
        self.wait_for_turn().await;

        let limit = max_results.to_string();
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("query", query), ("limit", limit.as_str()), ("fields", FIELDS)])
            .send()
            .await
            .context("scholar search request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("scholar search failed with status {}: {}", status, body);
        }

        let search: SearchResponse = response
            .json()
            .await
            .context("failed to parse scholar search response")?;

        let mut records = Vec::new();
        for (i, paper) in search.data.into_iter().take(max_results).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.request_delay).await;
            }
            debug!(title = ?paper.title, "scholar: accepted record");
            records.push(RawRecord::Scholar(paper));
        }

        Ok(records)
    }
}
