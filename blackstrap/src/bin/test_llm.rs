use blackstrap::seeker::Seeker;
use blackstrap::sources::SourceRegistry;
use blackstrap::storage::{ensure_schema, Repository, SqliteRepository};
use blackstrap::synthesizer::{Synthesizer, SynthesizerConfig};
use common::LlmConfig;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    let llm = LlmConfig {
        api_url: std::env::var("LLM_BASE_URL").ok(),
        model: std::env::var("LLM_MODEL").ok(),
        ..Default::default()
    };
    let config = SynthesizerConfig::from_llm_config(Some(&llm));

    println!("\n{}", "=".repeat(60));
    println!("Testing synthesis pipeline");
    println!("Base URL: {}", config.api_url);
    println!("Model: {}", config.model);
    println!("{}", "=".repeat(60));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    ensure_schema(&pool).await?;
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new(pool));

    // No adapters registered: the pipeline runs on the fallback articles only
    let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
    let synthesizer = match Synthesizer::from_config(&config, seeker, repo.clone()) {
        Ok(s) => {
            println!("✓ Synthesizer created");
            s
        }
        Err(e) => {
            eprintln!("✗ Failed: {}", e);
            return Err(e.into());
        }
    };

    let feed_id = Uuid::new_v4();
    let narrative_id = synthesizer
        .synthesize(feed_id, "artificial intelligence ethics", "Focus on responsible AI")
        .await?;
    println!("✓ Narrative created: {}", narrative_id);

    if let Some(narrative) = repo.get_narrative(narrative_id).await? {
        println!("  Title: {}", narrative.title);
        println!("  Articles: {}", narrative.article_ids.len());
        println!("  Body: {}...", narrative.body.chars().take(200).collect::<String>());
    }

    println!("\n{}", "=".repeat(60));
    println!("Tests completed");
    println!("{}", "=".repeat(60));
    Ok(())
}
