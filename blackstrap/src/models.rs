use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type FeedId = Uuid;
pub type ArticleId = Uuid;
pub type NarrativeId = Uuid;

/// Where an article came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Academic search engine
    Scholar,
    /// Preprint archive
    Arxiv,
    /// Syndicated feed (RSS, Atom, Substack)
    Rss,
    /// Placeholder article generated from the topic when every source came back empty
    Fallback,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Scholar => "scholar",
            SourceKind::Arxiv => "arxiv",
            SourceKind::Rss => "rss",
            SourceKind::Fallback => "fallback",
        }
    }

    /// Parse a source tag. Unknown tags yield `None` so callers can skip them.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "scholar" => Some(SourceKind::Scholar),
            "arxiv" | "preprint-archive" => Some(SourceKind::Arxiv),
            "rss" | "syndicated-feed" => Some(SourceKind::Rss),
            "fallback" | "synthetic-fallback" => Some(SourceKind::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic feed owned by the command-line layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub name: String,
    pub topic: String,
    pub guidance: String,
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub name: String,
    pub topic: String,
    pub guidance: String,
    pub sources: Vec<String>,
}

/// Normalized article ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub feed_id: FeedId,
    pub title: String,
    pub abstract_text: String,
    /// Empty when the source gave no link
    pub url: String,
    pub authors: Vec<String>,
    pub published: Option<String>,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub feed_id: FeedId,
    pub title: String,
    pub abstract_text: String,
    pub url: String,
    pub authors: Vec<String>,
    pub published: Option<String>,
    pub source: SourceKind,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNarrative {
    pub feed_id: FeedId,
    pub title: String,
    pub body: String,
    pub article_ids: Vec<ArticleId>,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narrative {
    pub id: NarrativeId,
    pub feed_id: FeedId,
    pub title: String,
    pub body: String,
    /// Snapshot taken at synthesis time; ids may point at purged articles later
    pub article_ids: Vec<ArticleId>,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only context profile record
#[derive(Debug, Clone)]
pub struct NewContextEntry {
    pub content_type: String,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub narrative_id: NarrativeId,
    pub rating: Option<i64>,
    pub notes: String,
}
