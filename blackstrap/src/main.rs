/*
blackstrap - command-line entry point.
Creates topic feeds, triggers synthesis and records feedback. All pipeline logic lives in the library.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::{init_db_pool, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

use blackstrap::models::{NewFeed, NewFeedback};
use blackstrap::seeker::Seeker;
use blackstrap::storage::{ensure_schema, Repository, SqliteRepository};
use blackstrap::synthesizer::{Synthesizer, SynthesizerConfig};

#[derive(Parser, Debug)]
#[command(name = "blackstrap", about = "Research feed aggregator and narrative synthesizer")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage topic feeds
    Feed {
        #[command(subcommand)]
        action: FeedCommand,
    },
    /// Gather fresh articles for a feed and synthesize a narrative
    Synthesize { feed_id: Uuid },
    /// Show the narratives of a feed, newest first
    Narratives { feed_id: Uuid },
    /// Rate a narrative or leave notes on it
    Feedback {
        narrative_id: Uuid,
        #[arg(long)]
        rating: Option<i64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print the resolved database path and credential status
    CheckEnv,
}

#[derive(Subcommand, Debug)]
enum FeedCommand {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        topic: String,
        #[arg(long, default_value = "")]
        guidance: String,
        /// Source tags to query (scholar, arxiv, rss); repeatable
        #[arg(long = "source")]
        sources: Vec<String>,
    },
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    dotenv::dotenv().ok();

    let config = load_config(args.config.as_deref()).await?;

    match args.command {
        Command::CheckEnv => check_env(&config).await?,
        Command::Feed { action: FeedCommand::Add { name, topic, guidance, sources } } => {
            let repo = open_repository(&config).await?;
            let sources = if sources.is_empty() {
                vec!["scholar".to_string(), "arxiv".to_string()]
            } else {
                sources
            };
            let id = repo
                .create_feed(&NewFeed { name: name.clone(), topic, guidance, sources })
                .await?;
            println!("Feed \"{}\" created: {}", name, id);
        }
        Command::Feed { action: FeedCommand::List } => {
            let repo = open_repository(&config).await?;
            let feeds = repo.list_feeds().await?;
            if feeds.is_empty() {
                println!("No feeds yet. Create one with `blackstrap feed add`.");
            }
            for feed in feeds {
                println!("{}  {}  [{}]  topic: {}", feed.id, feed.name, feed.sources.join(", "), feed.topic);
            }
        }
        Command::Synthesize { feed_id } => {
            let repo = open_repository(&config).await?;
            synthesize(&config, repo, feed_id).await?
        }
        Command::Narratives { feed_id } => {
            let repo = open_repository(&config).await?;
            let narratives = repo.list_narratives(feed_id).await?;
            if narratives.is_empty() {
                println!("No narratives for feed {}", feed_id);
            }
            for narrative in narratives {
                println!("{}", "=".repeat(60));
                println!("# {}", narrative.title);
                println!("id: {}  created: {}  articles: {}", narrative.id, narrative.created_at, narrative.article_ids.len());
                println!("{}", "=".repeat(60));
                println!("{}\n", narrative.body);
            }
        }
        Command::Feedback { narrative_id, rating, notes } => {
            let notes = notes.unwrap_or_default();
            if rating.is_none() && notes.trim().is_empty() {
                anyhow::bail!("provide --rating and/or --notes");
            }
            if let Some(r) = rating {
                if !(1..=5).contains(&r) {
                    anyhow::bail!("rating must be between 1 and 5, got {}", r);
                }
            }
            let repo = open_repository(&config).await?;
            repo.get_narrative(narrative_id)
                .await?
                .with_context(|| format!("Narrative not found: {}", narrative_id))?;
            repo.create_feedback(&NewFeedback { narrative_id, rating, notes }).await?;
            println!("Thank you for your feedback!");
        }
    }

    Ok(())
}

/// Open the configured database and make sure the schema exists.
async fn open_repository(config: &Config) -> Result<Arc<dyn Repository>> {
    let pool = init_db_pool(&config.database.path).await.map_err(|e| {
        error!(%e, db_path = %config.database.path, "failed to initialize database pool");
        e
    })?;
    ensure_schema(&pool).await?;
    Ok(Arc::new(SqliteRepository::new(pool)))
}

/// `config.default.toml` merged with `--config` (or `config.toml` when present).
async fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = match explicit {
        Some(p) if !p.exists() => {
            error!(path = ?p, "specified config file not found");
            anyhow::bail!("Config file not found: {}", p.display());
        }
        Some(p) => Some(p.to_path_buf()),
        None => Some(PathBuf::from("config.toml")).filter(|p| p.exists()),
    };

    let config = Config::load_with_defaults(
        Some(&default_path).filter(|p| p.exists()).map(|p| p.as_path()),
        override_path.as_deref(),
    )
    .await?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}

async fn synthesize(config: &Config, repo: Arc<dyn Repository>, feed_id: Uuid) -> Result<()> {
    let feed = repo
        .get_feed(feed_id)
        .await?
        .with_context(|| format!("Feed not found: {}", feed_id))?;

    let sources_config = config.sources.clone().unwrap_or_default();
    let mut seeker = Seeker::from_config(repo.clone(), &sources_config)?;
    if !feed.sources.is_empty() {
        seeker = seeker.with_default_kinds(feed.sources.clone());
    }

    let synth_config = SynthesizerConfig::from_llm_config(config.llm.as_ref());
    let synthesizer = Synthesizer::from_config(&synth_config, seeker, repo.clone())?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, cancelling synthesis");
            ctrl_c_cancel.cancel();
        }
    });

    info!(feed_id = %feed.id, topic = %feed.topic, "Starting synthesis");
    let narrative_id = synthesizer
        .synthesize_with_cancel(feed.id, &feed.topic, &feed.guidance, &cancel)
        .await?;
    info!(narrative_id = %narrative_id, "Synthesis completed successfully");

    if let Some(narrative) = repo.get_narrative(narrative_id).await? {
        println!("New narrative synthesized: {}", narrative_id);
        println!("# {}\n\n{}", narrative.title, narrative.body);
    }
    Ok(())
}

async fn check_env(config: &Config) -> Result<()> {
    println!("=== Blackstrap Environment Check ===\n");
    println!("Current working directory: {}", std::env::current_dir()?.display());

    let full_db_path = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p,
        Err(_) => std::env::current_dir()?.join(&config.database.path),
    };
    println!("Database path: {}", full_db_path.display());
    match tokio::fs::metadata(&full_db_path).await {
        Ok(meta) => {
            println!("Database exists: true");
            println!("Database size: {} bytes\n", meta.len());
        }
        Err(_) => println!("Database exists: false\n"),
    }

    let synth_config = SynthesizerConfig::from_llm_config(config.llm.as_ref());
    match synth_config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        Some(key) => println!("{}: set ({})", synth_config.api_key_env, mask_key(key)),
        None => println!("{}: not set", synth_config.api_key_env),
    }
    println!("Model: {}  Endpoint: {}", synth_config.model, synth_config.api_url);
    Ok(())
}

/// First 8 and last 4 characters of a key
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 12 {
        let head: String = chars[..8].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}
