/*!
common/src/lib.rs

Shared configuration types and DB helper functions for Blackstrap.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default file with an optional override file
- A helper to open the SQLite connection pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/blackstrap.db")
    pub path: String,
}

/// Completion service config (OpenAI-compatible chat endpoint)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// Academic search source (Semantic Scholar graph API)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScholarConfig {
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
    /// Pause between consecutive records, in milliseconds
    pub request_delay_ms: Option<u64>,
}

/// Preprint archive source (arXiv Atom API)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArxivConfig {
    pub enabled: Option<bool>,
    pub api_url: Option<String>,
}

/// Syndicated feed source (RSS / Atom / Substack)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RssConfig {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub feed_urls: Vec<String>,
    /// Return a fixed sample article when `feed_urls` is empty (legacy demo content)
    pub demo_sample: Option<bool>,
}

/// Source adapters and aggregation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Source tags queried when a caller does not name any (e.g. ["scholar", "arxiv"])
    pub default_kinds: Option<Vec<String>>,
    /// Per-adapter result cap for a single fetch
    pub max_results: Option<usize>,
    pub fetch_timeout_seconds: Option<u64>,
    pub scholar: Option<ScholarConfig>,
    pub arxiv: Option<ArxivConfig>,
    pub rss: Option<RssConfig>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: Option<LlmConfig>,
    pub sources: Option<SourcesConfig>,
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and the DB file if missing, then returns a
/// WAL-mode pool with a small connection limit.
///
/// Example:
///   let pool = init_db_pool("data/blackstrap.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
