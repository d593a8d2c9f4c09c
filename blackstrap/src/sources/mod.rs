//! Source adapters and the normalization of their raw records.
//!
//! Each adapter returns records in the shape its upstream uses. [`RawRecord::normalize`] maps
//! every shape onto [`NewArticle`] with the same field defaults:
//! a missing or blank title becomes [`UNKNOWN_TITLE`], a missing abstract or url becomes an
//! empty string and missing authors become an empty list.

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::SourcesConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::ingestion::build_http_client;
use crate::models::{FeedId, NewArticle, SourceKind};

pub mod arxiv;
pub mod rss;
pub mod scholar;

pub use arxiv::ArxivSource;
pub use rss::RssSource;
pub use scholar::ScholarSource;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;

/// A queryable upstream of research articles
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Whether the adapter can be queried at all (enabled and configured).
    /// An unavailable adapter is treated like one that returned nothing.
    fn is_available(&self) -> bool {
        true
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<Vec<RawRecord>>;
}

/// Paper as returned by the Semantic Scholar graph API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScholarPaper {
    #[serde(rename = "paperId", default)]
    pub paper_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub authors: Option<Vec<ScholarAuthor>>,
    #[serde(default)]
    pub year: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScholarAuthor {
    #[serde(default)]
    pub name: Option<String>,
}

/// Entry of the arXiv Atom API
#[derive(Debug, Clone, Default)]
pub struct ArxivEntry {
    pub entry_id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub published: Option<DateTime<Utc>>,
}

/// Item of a syndicated feed
#[derive(Debug, Clone, Default)]
pub struct RssItem {
    pub title: Option<String>,
    /// May contain HTML
    pub summary: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
    pub published: Option<String>,
}

/// Record as produced by one adapter, before normalization
#[derive(Debug, Clone)]
pub enum RawRecord {
    Scholar(ScholarPaper),
    Arxiv(ArxivEntry),
    Rss(RssItem),
}

impl RawRecord {
    pub fn normalize(self, feed_id: FeedId) -> NewArticle {
        match self {
            RawRecord::Scholar(paper) => normalize_scholar(feed_id, paper),
            RawRecord::Arxiv(entry) => normalize_arxiv(feed_id, entry),
            RawRecord::Rss(item) => normalize_rss(feed_id, item),
        }
    }
}

fn normalize_scholar(feed_id: FeedId, paper: ScholarPaper) -> NewArticle {
    let authors = paper
        .authors
        .unwrap_or_default()
        .into_iter()
        .filter_map(|a| non_blank(a.name))
        .collect();

    NewArticle {
        feed_id,
        title: normalize_title(paper.title.as_deref()),
        abstract_text: paper.abstract_text.map(|a| a.trim().to_string()).unwrap_or_default(),
        url: non_blank(paper.url).unwrap_or_default(),
        authors,
        published: paper.year.map(|y| y.to_string()),
        source: SourceKind::Scholar,
    }
}

fn normalize_arxiv(feed_id: FeedId, entry: ArxivEntry) -> NewArticle {
    NewArticle {
        feed_id,
        title: normalize_title(entry.title.as_deref()),
        abstract_text: entry.summary.map(|s| collapse_whitespace(&s)).unwrap_or_default(),
        url: non_blank(entry.entry_id).unwrap_or_default(),
        authors: entry.authors.into_iter().filter_map(|a| non_blank(Some(a))).collect(),
        published: entry.published.map(|d| d.format("%Y-%m-%d").to_string()),
        source: SourceKind::Arxiv,
    }
}

fn normalize_rss(feed_id: FeedId, item: RssItem) -> NewArticle {
    NewArticle {
        feed_id,
        title: normalize_title(item.title.as_deref()),
        abstract_text: item.summary.as_deref().map(html_to_text).unwrap_or_default(),
        url: non_blank(item.link).unwrap_or_default(),
        authors: non_blank(item.author).into_iter().collect(),
        published: non_blank(item.published),
        source: SourceKind::Rss,
    }
}

/// Trimmed title with internal whitespace collapsed, or [`UNKNOWN_TITLE`]
pub fn normalize_title(title: Option<&str>) -> String {
    match title.map(collapse_whitespace) {
        Some(t) if !t.is_empty() => t,
        _ => UNKNOWN_TITLE.to_string(),
    }
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Feed summaries are often HTML fragments
fn html_to_text(summary: &str) -> String {
    if !summary.contains('<') {
        return collapse_whitespace(summary);
    }
    match html2text::from_read(summary.as_bytes(), 120) {
        Ok(text) => collapse_whitespace(&text),
        Err(e) => {
            tracing::debug!("sources: html2text failed, keeping raw summary: {}", e);
            collapse_whitespace(summary)
        }
    }
}

/// Adapters by source kind
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: HashMap<SourceKind, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous adapter of the same kind
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(&kind)
    }

    /// Build the three built-in adapters from the `[sources]` config section.
    pub fn from_config(config: &SourcesConfig) -> Result<Self> {
        let timeout = config.fetch_timeout_seconds.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);
        let client = build_http_client(timeout)?;

        let scholar = config.scholar.clone().unwrap_or_default();
        let arxiv = config.arxiv.clone().unwrap_or_default();
        let rss = config.rss.clone().unwrap_or_default();

        Ok(Self::new()
            .with(Arc::new(ScholarSource::from_config(client.clone(), &scholar)))
            .with(Arc::new(ArxivSource::from_config(client.clone(), &arxiv)))
            .with(Arc::new(RssSource::from_config(client, &rss))))
    }
}
