use anyhow::Result;
use blackstrap::llm::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use blackstrap::seeker::Seeker;
use blackstrap::sources::SourceRegistry;
use blackstrap::storage::{ensure_schema, Repository, SqliteRepository};
use blackstrap::synthesizer::{
    GenerationOptions, Synthesizer, SynthesizerConfig, CONTEXT_TYPE_NARRATIVE, SYSTEM_INSTRUCTION,
};
use blackstrap::Error;
use mockito::Matcher;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Echoes a canned response and keeps every request it saw
#[derive(Default)]
struct MockLlm {
    response: String,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockLlm {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(LlmResponse {
            content: self.response.clone(),
            usage: UsageMetadata::default(),
            model: "mock".to_string(),
        })
    }
}

struct FailingLlm;

#[async_trait::async_trait]
impl LlmProvider for FailingLlm {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
        anyhow::bail!("LLM API error 503 Service Unavailable: upstream overloaded")
    }
}

struct SlowLlm(Duration);

#[async_trait::async_trait]
impl LlmProvider for SlowLlm {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse> {
        tokio::time::sleep(self.0).await;
        Ok(LlmResponse {
            content: "# Too Late\nbody".to_string(),
            usage: UsageMetadata::default(),
            model: "slow".to_string(),
        })
    }
}

async fn setup() -> Arc<SqliteRepository> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create pool");
    ensure_schema(&pool).await.expect("Failed to create schema");
    Arc::new(SqliteRepository::new(pool))
}

/// Synthesizer with no source adapters: every run works on the fallback articles
fn synthesizer(repo: &Arc<SqliteRepository>, llm: Arc<dyn LlmProvider>) -> Synthesizer {
    let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
    Synthesizer::new(seeker, repo.clone(), llm, GenerationOptions::default())
}

fn config_with_key(api_url: &str, api_key: Option<&str>) -> SynthesizerConfig {
    SynthesizerConfig {
        api_key: api_key.map(str::to_string),
        api_key_env: "BLACKSTRAP_TEST_API_KEY".to_string(),
        api_url: api_url.to_string(),
        model: "gpt-3.5-turbo".to_string(),
        generation: GenerationOptions::default(),
    }
}

async fn count(repo: &SqliteRepository, table: &str) -> i64 {
    sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
        .fetch_one(repo.pool())
        .await
        .expect("count rows")
        .get::<i64, _>("n")
}

#[tokio::test]
async fn test_end_to_end_with_fallback_articles() {
    let repo = setup().await;
    let llm = Arc::new(MockLlm::new(
        "# Graphs That Think\nMessage passing ties the three reviews together.\n\nA second paragraph.",
    ));
    let synth = synthesizer(&repo, llm.clone());
    let feed_id = Uuid::new_v4();

    let narrative_id = synth
        .synthesize(feed_id, "graph neural networks", "")
        .await
        .expect("synthesize");

    let narrative = repo
        .get_narrative(narrative_id)
        .await
        .expect("get narrative")
        .expect("narrative exists");
    assert_eq!(narrative.feed_id, feed_id);
    assert_eq!(narrative.title, "Graphs That Think");
    assert_eq!(
        narrative.body,
        "Message passing ties the three reviews together.\n\nA second paragraph."
    );
    assert_eq!(narrative.article_ids.len(), 3);
    for id in &narrative.article_ids {
        assert!(repo.get_article(*id).await.expect("get article").is_some());
    }

    let requests = llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].system.as_deref(), Some(SYSTEM_INSTRUCTION));
    assert_eq!(requests[0].max_tokens, Some(2000));
    assert!(requests[0].prompt.contains("graph neural networks"));
    assert!(requests[0].prompt.contains("--- Article 3 ---"));
    assert_eq!(narrative.prompt, requests[0].prompt);

    let row = sqlx::query("SELECT content_type, content_text, metadata FROM context_entries")
        .fetch_one(repo.pool())
        .await
        .expect("context entry");
    assert_eq!(row.get::<String, _>("content_type"), CONTEXT_TYPE_NARRATIVE);
    assert!(row.get::<String, _>("content_text").starts_with("# Graphs That Think"));
    let metadata: HashMap<String, String> =
        serde_json::from_str(&row.get::<String, _>("metadata")).expect("metadata json");
    assert_eq!(metadata.get("topic").map(String::as_str), Some("graph neural networks"));
}

#[tokio::test]
async fn test_failed_completion_stores_placeholder() {
    let repo = setup().await;
    let synth = synthesizer(&repo, Arc::new(FailingLlm));

    let narrative_id = synth
        .synthesize(Uuid::new_v4(), "protein folding", "")
        .await
        .expect("synthesize");

    let narrative = repo.get_narrative(narrative_id).await.expect("get").expect("exists");
    assert_eq!(narrative.title, "Synthesis Pending");
    assert!(narrative.body.contains("503 Service Unavailable"));
    assert_eq!(narrative.article_ids.len(), 3);
    assert_eq!(count(&repo, "context_entries").await, 1);
}

#[tokio::test]
async fn test_empty_completion_stores_placeholder() {
    let repo = setup().await;
    let synth = synthesizer(&repo, Arc::new(MockLlm::new("   \n ")));

    let narrative_id = synth.synthesize(Uuid::new_v4(), "topic", "").await.expect("synthesize");

    let narrative = repo.get_narrative(narrative_id).await.expect("get").expect("exists");
    assert_eq!(narrative.title, "Synthesis Pending");
    assert!(narrative.body.contains("empty response"));
}

#[tokio::test]
async fn test_guidance_reaches_prompt_only_when_present() {
    let repo = setup().await;
    let llm = Arc::new(MockLlm::new("# T\nB"));
    let synth = synthesizer(&repo, llm.clone());
    let feed_id = Uuid::new_v4();

    synth
        .synthesize(feed_id, "artificial intelligence ethics", "Focus on responsible AI")
        .await
        .expect("synthesize");
    synth
        .synthesize(feed_id, "artificial intelligence ethics", "   ")
        .await
        .expect("synthesize");

    let requests = llm.requests();
    assert!(requests[0].prompt.contains("Synthesis guidance: Focus on responsible AI"));
    assert!(!requests[1].prompt.contains("Synthesis guidance"));
}

#[tokio::test]
async fn test_repeated_runs_create_distinct_narratives() {
    let repo = setup().await;
    let synth = synthesizer(&repo, Arc::new(MockLlm::new("# Same\nSame body")));
    let feed_id = Uuid::new_v4();

    let first = synth.synthesize(feed_id, "topic", "").await.expect("synthesize");
    let second = synth.synthesize(feed_id, "topic", "").await.expect("synthesize");
    assert_ne!(first, second);

    let a = repo.get_narrative(first).await.expect("get").expect("exists");
    let b = repo.get_narrative(second).await.expect("get").expect("exists");
    assert!(a.article_ids.iter().all(|id| !b.article_ids.contains(id)));

    assert_eq!(repo.list_narratives(feed_id).await.expect("list").len(), 2);
    assert_eq!(count(&repo, "articles").await, 6);
    assert_eq!(count(&repo, "context_entries").await, 2);
}

#[tokio::test]
async fn test_single_line_response_is_title_and_body() {
    let repo = setup().await;
    let synth = synthesizer(&repo, Arc::new(MockLlm::new("Only one line of output")));

    let narrative_id = synth.synthesize(Uuid::new_v4(), "topic", "").await.expect("synthesize");

    let narrative = repo.get_narrative(narrative_id).await.expect("get").expect("exists");
    assert_eq!(narrative.title, "Only one line of output");
    assert_eq!(narrative.body, "Only one line of output");
}

#[tokio::test]
async fn test_missing_credential_fails_at_construction() {
    let repo = setup().await;

    for key in [None, Some(""), Some("   ")] {
        let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
        let result = Synthesizer::from_config(&config_with_key("http://localhost", key), seeker, repo.clone());
        match result {
            Err(Error::MissingCredential(env)) => assert_eq!(env, "BLACKSTRAP_TEST_API_KEY"),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("construction should fail for key {:?}", key),
        }
    }
}

#[tokio::test]
async fn test_invalid_generation_settings_are_rejected() {
    let repo = setup().await;

    let mut config = config_with_key("http://localhost", Some("sk-test"));
    config.generation.temperature = 3.5;
    let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
    assert!(matches!(
        Synthesizer::from_config(&config, seeker, repo.clone()),
        Err(Error::Config(_))
    ));

    let mut config = config_with_key("http://localhost", Some("sk-test"));
    config.generation.max_tokens = 0;
    let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
    assert!(matches!(
        Synthesizer::from_config(&config, seeker, repo.clone()),
        Err(Error::Config(_))
    ));
}

#[tokio::test]
async fn test_cancel_before_start_writes_nothing() {
    let repo = setup().await;
    let llm = Arc::new(MockLlm::new("# T\nB"));
    let synth = synthesizer(&repo, llm.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = synth
        .synthesize_with_cancel(Uuid::new_v4(), "topic", "", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(llm.requests().is_empty());
    assert_eq!(count(&repo, "articles").await, 0);
    assert_eq!(count(&repo, "narratives").await, 0);
    assert_eq!(count(&repo, "context_entries").await, 0);
}

#[tokio::test]
async fn test_cancel_during_completion_writes_no_narrative() {
    let repo = setup().await;
    let synth = synthesizer(&repo, Arc::new(SlowLlm(Duration::from_secs(10))));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = synth
        .synthesize_with_cancel(Uuid::new_v4(), "topic", "", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(count(&repo, "narratives").await, 0);
    assert_eq!(count(&repo, "context_entries").await, 0);
}

#[tokio::test]
async fn test_slow_completion_times_out_into_placeholder() {
    let repo = setup().await;
    let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
    let options = GenerationOptions {
        timeout_seconds: 1,
        ..Default::default()
    };
    let synth = Synthesizer::new(seeker, repo.clone(), Arc::new(SlowLlm(Duration::from_secs(5))), options);

    let narrative_id = synth.synthesize(Uuid::new_v4(), "topic", "").await.expect("synthesize");

    let narrative = repo.get_narrative(narrative_id).await.expect("get").expect("exists");
    assert_eq!(narrative.title, "Synthesis Pending");
    assert!(narrative.body.contains("timed out"));
}

#[tokio::test]
async fn test_remote_provider_through_from_config() {
    let mut server = mockito::Server::new_async().await;

    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""role":"system""#.to_string()),
            Matcher::Regex("contemplative academic synthesizer".to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r##"{"model": "gpt-3.5-turbo", "choices": [{"message": {"role": "assistant", "content": "# Remote Title\nRemote body"}}], "usage": {"prompt_tokens": 1, "completion_tokens": 1, "total_tokens": 2}}"##,
        )
        .create_async()
        .await;

    let repo = setup().await;
    let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
    let config = config_with_key(&format!("{}/v1/chat/completions", server.url()), Some("sk-test"));
    let synth = Synthesizer::from_config(&config, seeker, repo.clone()).expect("construct");

    let narrative_id = synth.synthesize(Uuid::new_v4(), "graph neural networks", "").await.expect("synthesize");

    let narrative = repo.get_narrative(narrative_id).await.expect("get").expect("exists");
    assert_eq!(narrative.title, "Remote Title");
    assert_eq!(narrative.body, "Remote body");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_remote_auth_failure_becomes_placeholder() {
    let mut server = mockito::Server::new_async().await;

    let _mock = server
        .mock("POST", "/v1/chat/completions")
        .with_status(401)
        .with_body(r#"{"error": {"message": "Incorrect API key provided"}}"#)
        .create_async()
        .await;

    let repo = setup().await;
    let seeker = Seeker::new(repo.clone(), SourceRegistry::new());
    let config = config_with_key(&format!("{}/v1/chat/completions", server.url()), Some("sk-wrong"));
    let synth = Synthesizer::from_config(&config, seeker, repo.clone()).expect("construct");

    let narrative_id = synth.synthesize(Uuid::new_v4(), "topic", "").await.expect("synthesize");

    let narrative = repo.get_narrative(narrative_id).await.expect("get").expect("exists");
    assert_eq!(narrative.title, "Synthesis Pending");
    assert!(narrative.body.contains("401"));
}

#[tokio::test]
async fn test_failed_context_append_leaves_no_narrative() {
    let repo = setup().await;
    sqlx::query("DROP TABLE context_entries")
        .execute(repo.pool())
        .await
        .expect("drop context_entries");
    let synth = synthesizer(&repo, Arc::new(MockLlm::new("# T\nB")));

    let err = synth
        .synthesize(Uuid::new_v4(), "topic", "")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(count(&repo, "narratives").await, 0);
}
