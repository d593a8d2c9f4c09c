use anyhow::{Context, Result};
use common::ArxivConfig;
use feed_rs::model::Entry;
use reqwest::Client;

use super::{ArxivEntry, RawRecord, SourceAdapter};
use crate::ingestion::fetch_and_parse_feed;
use crate::models::SourceKind;

pub const DEFAULT_API_URL: &str = "http://export.arxiv.org/api/query";

/// Preprint search through the arXiv Atom query API
pub struct ArxivSource {
    client: Client,
    api_url: String,
    enabled: bool,
}

impl ArxivSource {
    pub fn new(client: Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            enabled: true,
        }
    }

    pub fn from_config(client: Client, config: &ArxivConfig) -> Self {
        let mut source = Self::new(
            client,
            config.api_url.clone().unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        );
        source.enabled = config.enabled.unwrap_or(true);
        source
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn search_url(&self, query: &str, max_results: usize) -> Result<url::Url> {
        url::Url::parse_with_params(
            &self.api_url,
            &[
                ("search_query", format!("all:{}", query)),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
                ("sortBy", "relevance".to_string()),
            ],
        )
        .with_context(|| format!("invalid arxiv api url: {}", self.api_url))
    }
}

fn entry_to_record(entry: Entry) -> RawRecord {
    RawRecord::Arxiv(ArxivEntry {
        entry_id: Some(entry.id).filter(|id| !id.is_empty()),
        title: entry.title.map(|t| t.content),
        summary: entry.summary.map(|s| s.content),
        authors: entry.authors.into_iter().map(|p| p.name).collect(),
        published: entry.published.or(entry.updated),
    })
}

#[async_trait::async_trait]
impl SourceAdapter for ArxivSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Arxiv
    }

    fn is_available(&self) -> bool {
        self.enabled && !self.api_url.trim().is_empty()
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawRecord>> {
        let url = self.search_url(query, max_results)?;
        let feed = fetch_and_parse_feed(&self.client, url.as_str())
            .await
            .context("arxiv query failed")?;

        Ok(feed
            .entries
            .into_iter()
            .take(max_results)
            .map(entry_to_record)
            .collect())
    }
}
