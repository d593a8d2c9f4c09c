use anyhow::Result;
use common::RssConfig;
use feed_rs::model::Entry;
use reqwest::Client;
use tracing::{info, warn};

use super::{RawRecord, RssItem, SourceAdapter};
use crate::ingestion::fetch_and_parse_feed;
use crate::models::SourceKind;

const ENTRIES_PER_FEED: usize = 5;

/// Syndicated feeds (RSS, Atom, Substack). Items are not filtered by topic.
pub struct RssSource {
    client: Client,
    feed_urls: Vec<String>,
    demo_sample: bool,
    enabled: bool,
}

impl RssSource {
    pub fn new(client: Client, feed_urls: Vec<String>) -> Self {
        Self {
            client,
            feed_urls,
            demo_sample: true,
            enabled: true,
        }
    }

    pub fn from_config(client: Client, config: &RssConfig) -> Self {
        let mut source = Self::new(client, config.feed_urls.clone());
        source.demo_sample = config.demo_sample.unwrap_or(true);
        source.enabled = config.enabled.unwrap_or(true);
        source
    }

    /// Legacy behavior: with no feed URLs configured, return one fixed sample item.
    pub fn with_demo_sample(mut self, demo_sample: bool) -> Self {
        self.demo_sample = demo_sample;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

pub fn demo_item() -> RssItem {
    RssItem {
        title: Some("The Future of AI Research: A Deep Dive".to_string()),
        summary: Some(
            "An insightful analysis of emerging trends in artificial intelligence research, \
             covering breakthrough methodologies and their real-world implications."
                .to_string(),
        ),
        link: Some("https://example.substack.com/p/future-ai-research".to_string()),
        author: Some("Dr. Sarah Chen".to_string()),
        published: Some("2024-01-15".to_string()),
    }
}

fn entry_to_record(entry: Entry) -> RawRecord {
    RawRecord::Rss(RssItem {
        title: entry.title.map(|t| t.content),
        summary: entry
            .summary
            .map(|s| s.content)
            .or_else(|| entry.content.and_then(|c| c.body)),
        link: entry.links.into_iter().next().map(|l| l.href),
        author: entry.authors.into_iter().next().map(|p| p.name),
        published: entry.published.or(entry.updated).map(|d| d.to_rfc3339()),
    })
}

#[async_trait::async_trait]
impl SourceAdapter for RssSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    async fn fetch(&self, _query: &str, max_results: usize) -> Result<Vec<RawRecord>> {
        if self.feed_urls.is_empty() {
            if self.demo_sample {
                info!("rss: no feed urls configured, returning demo sample");
                return Ok(vec![RawRecord::Rss(demo_item())]);
            }
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for feed_url in &self.feed_urls {
            if records.len() >= max_results {
                break;
            }
            match fetch_and_parse_feed(&self.client, feed_url).await {
                Ok(feed) => {
                    info!("rss: fetched '{}': {} entries", feed_url, feed.entries.len());
                    records.extend(feed.entries.into_iter().take(ENTRIES_PER_FEED).map(entry_to_record));
                }
                Err(e) => {
                    warn!(source = "rss", feed_url = %feed_url, "rss: failed to fetch feed: {:#}", e);
                }
            }
        }

        records.truncate(max_results);
        Ok(records)
    }
}
