use blackstrap::models::SourceKind;
use blackstrap::sources::SourceRegistry;
use common::SourcesConfig;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "graph neural networks".to_string());

    let rss_urls: Vec<String> = std::env::var("RSS_FEED_URLS")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let config = SourcesConfig {
        rss: Some(common::RssConfig {
            feed_urls: rss_urls,
            ..Default::default()
        }),
        ..Default::default()
    };
    let registry = SourceRegistry::from_config(&config)?;

    for kind in [SourceKind::Scholar, SourceKind::Arxiv, SourceKind::Rss] {
        println!("\n{}", "=".repeat(60));
        println!("Testing source: {} (topic: {})", kind, topic);
        println!("{}", "=".repeat(60));

        let Some(adapter) = registry.get(kind) else {
            println!("✗ No adapter registered");
            continue;
        };
        if !adapter.is_available() {
            println!("✗ Adapter unavailable");
            continue;
        }

        match adapter.fetch(&topic, 3).await {
            Ok(records) => {
                println!("✓ Success! {} records", records.len());
                for (i, record) in records.into_iter().enumerate() {
                    let article = record.normalize(Uuid::nil());
                    println!("    {}. {}", i + 1, article.title);
                    println!("       Authors: {}", article.authors.join(", "));
                    println!("       URL: {}", if article.url.is_empty() { "none" } else { &article.url });
                    println!("       Abstract: {} chars", article.abstract_text.len());
                }
            }
            Err(e) => {
                println!("✗ Failed: {:#}", e);
            }
        }
    }

    Ok(())
}
