use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    Article, ArticleId, Feed, FeedId, Narrative, NarrativeId, NewArticle, NewContextEntry,
    NewFeed, NewFeedback, NewNarrative, SourceKind,
};

/// Record repository used by the pipeline and the command-line layer.
/// Every write is durable when the call returns.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    async fn create_feed(&self, feed: &NewFeed) -> Result<FeedId>;

    async fn get_feed(&self, id: FeedId) -> Result<Option<Feed>>;

    /// Newest first
    async fn list_feeds(&self) -> Result<Vec<Feed>>;

    async fn create_article(&self, article: &NewArticle) -> Result<ArticleId>;

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>>;

    async fn create_narrative(&self, narrative: &NewNarrative) -> Result<NarrativeId>;

    /// Store a narrative together with its context-profile entry: either both rows are
    /// written or neither is.
    async fn create_narrative_with_context(
        &self,
        narrative: &NewNarrative,
        entry: &NewContextEntry,
    ) -> Result<NarrativeId>;

    async fn get_narrative(&self, id: NarrativeId) -> Result<Option<Narrative>>;

    /// Newest first
    async fn list_narratives(&self, feed_id: FeedId) -> Result<Vec<Narrative>>;

    async fn create_context_entry(&self, entry: &NewContextEntry) -> Result<Uuid>;

    async fn create_feedback(&self, feedback: &NewFeedback) -> Result<Uuid>;
}

/// Create the tables used by Blackstrap if they are missing.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    info!("storage: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS feeds (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            topic TEXT NOT NULL,
            guidance TEXT,
            sources TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            feed_id TEXT NOT NULL,
            title TEXT NOT NULL,
            abstract TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT '',
            authors TEXT NOT NULL DEFAULT '[]',
            published_date TEXT,
            source_type TEXT NOT NULL,
            fetched_at TEXT NOT NULL
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_articles_feed ON articles(feed_id);",
        r#"
        CREATE TABLE IF NOT EXISTS narratives (
            id TEXT PRIMARY KEY,
            feed_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            article_ids TEXT NOT NULL DEFAULT '[]',
            synthesis_prompt TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_narratives_feed ON narratives(feed_id, created_at);",
        r#"
        CREATE TABLE IF NOT EXISTS feedback (
            id TEXT PRIMARY KEY,
            narrative_id TEXT NOT NULL,
            rating INTEGER,
            notes TEXT,
            created_at TEXT NOT NULL
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS context_entries (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            content_text TEXT NOT NULL,
            embedding TEXT,
            metadata TEXT,
            created_at TEXT NOT NULL
        );
        "#,
    ];

    for stmt in stmts {
        sqlx::query(stmt)
            .execute(pool)
            .await
            .with_context(|| format!("failed to apply schema statement: {}", stmt.trim()))?;
    }

    Ok(())
}

/// `Repository` backed by an sqlx SQLite pool
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Repository for SqliteRepository {
    async fn create_feed(&self, feed: &NewFeed) -> Result<FeedId> {
        let id = Uuid::new_v4();
        let sources_json =
            serde_json::to_string(&feed.sources).context("failed to serialize feed sources")?;

        sqlx::query(
            "INSERT INTO feeds (id, name, topic, guidance, sources, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&feed.name)
        .bind(&feed.topic)
        .bind(&feed.guidance)
        .bind(&sources_json)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .context("failed to insert feed")?;

        info!(feed_id = %id, name = %feed.name, "storage: created feed");
        Ok(id)
    }

    async fn get_feed(&self, id: FeedId) -> Result<Option<Feed>> {
        let row = sqlx::query_as::<_, FeedRow>(
            "SELECT id, name, topic, guidance, sources, created_at FROM feeds WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch feed")?;

        row.map(Feed::try_from).transpose()
    }

    async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let rows = sqlx::query_as::<_, FeedRow>(
            "SELECT id, name, topic, guidance, sources, created_at FROM feeds ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to list feeds")?;

        rows.into_iter().map(Feed::try_from).collect()
    }

    async fn create_article(&self, article: &NewArticle) -> Result<ArticleId> {
        let id = Uuid::new_v4();
        let authors_json =
            serde_json::to_string(&article.authors).context("failed to serialize authors")?;

        sqlx::query(
            r#"
            INSERT INTO articles (id, feed_id, title, abstract, url, authors, published_date, source_type, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(article.feed_id.to_string())
        .bind(&article.title)
        .bind(&article.abstract_text)
        .bind(&article.url)
        .bind(&authors_json)
        .bind(&article.published)
        .bind(article.source.as_str())
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .context("failed to insert article")?;

        debug!(article_id = %id, source = %article.source, "storage: created article");
        Ok(id)
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT id, feed_id, title, abstract, url, authors, published_date, source_type, fetched_at
            FROM articles
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch article")?;

        row.map(Article::try_from).transpose()
    }

    async fn create_narrative(&self, narrative: &NewNarrative) -> Result<NarrativeId> {
        let mut conn = self.pool.acquire().await.context("failed to acquire connection")?;
        let id = insert_narrative(&mut conn, narrative).await?;

        info!(narrative_id = %id, feed_id = %narrative.feed_id, "storage: created narrative");
        Ok(id)
    }

    async fn create_narrative_with_context(
        &self,
        narrative: &NewNarrative,
        entry: &NewContextEntry,
    ) -> Result<NarrativeId> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        // Dropping `tx` on error rolls both inserts back
        let id = insert_narrative(&mut tx, narrative).await?;
        let entry_id = insert_context_entry(&mut tx, entry).await?;

        tx.commit().await.context("failed to commit narrative")?;

        info!(
            narrative_id = %id,
            entry_id = %entry_id,
            feed_id = %narrative.feed_id,
            "storage: created narrative with context entry"
        );
        Ok(id)
    }

    async fn get_narrative(&self, id: NarrativeId) -> Result<Option<Narrative>> {
        let row = sqlx::query_as::<_, NarrativeRow>(
            r#"
            SELECT id, feed_id, title, content, article_ids, synthesis_prompt, created_at
            FROM narratives
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to fetch narrative")?;

        row.map(Narrative::try_from).transpose()
    }

    async fn list_narratives(&self, feed_id: FeedId) -> Result<Vec<Narrative>> {
        let rows = sqlx::query_as::<_, NarrativeRow>(
            r#"
            SELECT id, feed_id, title, content, article_ids, synthesis_prompt, created_at
            FROM narratives
            WHERE feed_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(feed_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("failed to list narratives")?;

        rows.into_iter().map(Narrative::try_from).collect()
    }

    async fn create_context_entry(&self, entry: &NewContextEntry) -> Result<Uuid> {
        let mut conn = self.pool.acquire().await.context("failed to acquire connection")?;
        insert_context_entry(&mut conn, entry).await
    }

    async fn create_feedback(&self, feedback: &NewFeedback) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO feedback (id, narrative_id, rating, notes, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(feedback.narrative_id.to_string())
        .bind(feedback.rating)
        .bind(&feedback.notes)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .context("failed to insert feedback")?;

        Ok(id)
    }
}

async fn insert_narrative(conn: &mut SqliteConnection, narrative: &NewNarrative) -> Result<NarrativeId> {
    let id = Uuid::new_v4();
    let article_ids_json = serde_json::to_string(&narrative.article_ids)
        .context("failed to serialize narrative article ids")?;

    sqlx::query(
        r#"
        INSERT INTO narratives (id, feed_id, title, content, article_ids, synthesis_prompt, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(narrative.feed_id.to_string())
    .bind(&narrative.title)
    .bind(&narrative.body)
    .bind(&article_ids_json)
    .bind(&narrative.prompt)
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await
    .context("failed to insert narrative")?;

    Ok(id)
}

async fn insert_context_entry(conn: &mut SqliteConnection, entry: &NewContextEntry) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let embedding_json = entry
        .embedding
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .context("failed to serialize embedding")?;
    let metadata_json = if entry.metadata.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&entry.metadata).context("failed to serialize metadata")?)
    };

    sqlx::query(
        r#"
        INSERT INTO context_entries (id, content_type, content_text, embedding, metadata, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&entry.content_type)
    .bind(&entry.text)
    .bind(embedding_json)
    .bind(metadata_json)
    .bind(now_timestamp())
    .execute(&mut *conn)
    .await
    .context("failed to insert context entry")?;

    debug!(entry_id = %id, content_type = %entry.content_type, "storage: appended context entry");
    Ok(id)
}

/// Fixed-width so that text ordering matches time ordering
fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Failed to parse {}", column))?
        .with_timezone(&Utc))
}

fn parse_id(raw: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid uuid in {}: {}", column, raw))
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct FeedRow {
    id: String,
    name: String,
    topic: String,
    guidance: Option<String>,
    sources: String,
    created_at: String,
}

impl TryFrom<FeedRow> for Feed {
    type Error = anyhow::Error;

    fn try_from(row: FeedRow) -> Result<Self> {
        Ok(Feed {
            id: parse_id(&row.id, "feeds.id")?,
            name: row.name,
            topic: row.topic,
            guidance: row.guidance.unwrap_or_default(),
            sources: serde_json::from_str(&row.sources).context("Failed to parse feed sources")?,
            created_at: parse_timestamp(&row.created_at, "feeds.created_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ArticleRow {
    id: String,
    feed_id: String,
    title: String,
    #[sqlx(rename = "abstract")]
    abstract_text: String,
    url: String,
    authors: String,
    published_date: Option<String>,
    source_type: String,
    fetched_at: String,
}

impl TryFrom<ArticleRow> for Article {
    type Error = anyhow::Error;

    fn try_from(row: ArticleRow) -> Result<Self> {
        let source = SourceKind::from_tag(&row.source_type)
            .with_context(|| format!("Unknown source_type for article {}: {}", row.id, row.source_type))?;

        Ok(Article {
            id: parse_id(&row.id, "articles.id")?,
            feed_id: parse_id(&row.feed_id, "articles.feed_id")?,
            title: row.title,
            abstract_text: row.abstract_text,
            url: row.url,
            authors: serde_json::from_str(&row.authors).context("Failed to parse article authors")?,
            published: row.published_date,
            source,
            fetched_at: parse_timestamp(&row.fetched_at, "articles.fetched_at")?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NarrativeRow {
    id: String,
    feed_id: String,
    title: String,
    content: String,
    article_ids: String,
    synthesis_prompt: String,
    created_at: String,
}

impl TryFrom<NarrativeRow> for Narrative {
    type Error = anyhow::Error;

    fn try_from(row: NarrativeRow) -> Result<Self> {
        Ok(Narrative {
            id: parse_id(&row.id, "narratives.id")?,
            feed_id: parse_id(&row.feed_id, "narratives.feed_id")?,
            title: row.title,
            body: row.content,
            article_ids: serde_json::from_str(&row.article_ids)
                .context("Failed to parse narrative article ids")?,
            prompt: row.synthesis_prompt,
            created_at: parse_timestamp(&row.created_at, "narratives.created_at")?,
        })
    }
}
