use common::LlmConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::llm::remote::{RemoteLlmProvider, DEFAULT_API_URL, DEFAULT_MODEL};
use crate::llm::{LlmProvider, LlmRequest};
use crate::models::{Article, ArticleId, FeedId, NarrativeId, NewContextEntry, NewNarrative};
use crate::seeker::Seeker;
use crate::storage::Repository;

pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const UNTITLED: &str = "Untitled Narrative";
pub const CONTEXT_TYPE_NARRATIVE: &str = "narrative";

pub const SYSTEM_INSTRUCTION: &str =
    "You are a thoughtful academic writer who creates contemplative, well-structured narratives.";

/// Sampling and budget settings for the completion call
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.7,
            timeout_seconds: 60,
        }
    }
}

/// Everything needed to build a [`Synthesizer`] backed by the remote completion service.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub api_key: Option<String>,
    /// Where the key was expected to come from; used in error messages
    pub api_key_env: String,
    pub api_url: String,
    pub model: String,
    pub generation: GenerationOptions,
}

impl SynthesizerConfig {
    /// Resolve the `[llm]` section, reading the credential from the named environment variable.
    pub fn from_llm_config(config: Option<&LlmConfig>) -> Self {
        let defaults = GenerationOptions::default();
        let api_key_env = config
            .and_then(|c| c.api_key_env.clone())
            .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());

        Self {
            api_key: std::env::var(&api_key_env).ok(),
            api_url: config
                .and_then(|c| c.api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            model: config
                .and_then(|c| c.model.clone())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            generation: GenerationOptions {
                max_tokens: config.and_then(|c| c.max_tokens).unwrap_or(defaults.max_tokens),
                temperature: config.and_then(|c| c.temperature).unwrap_or(defaults.temperature),
                timeout_seconds: config
                    .and_then(|c| c.timeout_seconds)
                    .unwrap_or(defaults.timeout_seconds),
            },
            api_key_env,
        }
    }
}

/// Turns freshly gathered articles into a narrative through the completion service.
pub struct Synthesizer {
    seeker: Seeker,
    repo: Arc<dyn Repository>,
    llm: Arc<dyn LlmProvider>,
    options: GenerationOptions,
}

impl Synthesizer {
    pub fn new(
        seeker: Seeker,
        repo: Arc<dyn Repository>,
        llm: Arc<dyn LlmProvider>,
        options: GenerationOptions,
    ) -> Self {
        Self {
            seeker,
            repo,
            llm,
            options,
        }
    }

    /// Build a synthesizer talking to the configured remote endpoint.
    /// Fails immediately when the credential is missing or the generation settings are invalid.
    pub fn from_config(
        config: &SynthesizerConfig,
        seeker: Seeker,
        repo: Arc<dyn Repository>,
    ) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::MissingCredential(config.api_key_env.clone()))?;

        let generation = &config.generation;
        if generation.max_tokens == 0 {
            return Err(Error::Config("llm.max_tokens must be greater than zero".to_string()));
        }
        if !(0.0..=2.0).contains(&generation.temperature) {
            return Err(Error::Config(format!(
                "llm.temperature must be between 0 and 2, got {}",
                generation.temperature
            )));
        }
        if generation.timeout_seconds == 0 {
            return Err(Error::Config("llm.timeout_seconds must be greater than zero".to_string()));
        }

        let provider = RemoteLlmProvider::new(&config.api_url, api_key, &config.model).with_defaults(
            generation.timeout_seconds,
            generation.max_tokens,
            generation.temperature,
        );
        info!(model = %provider.model(), api_url = %config.api_url, "synthesizer: completion provider configured");

        Ok(Self::new(seeker, repo, Arc::new(provider), generation.clone()))
    }

    /// Gather articles, generate a narrative and store it. Returns the new narrative id.
    ///
    /// Completion failures do not fail the call; the narrative then carries a placeholder body
    /// naming the error. Only persistence failures are returned, and the narrative and its
    /// context entry are committed together, so an error means neither was stored.
    pub async fn synthesize(&self, feed_id: FeedId, topic: &str, guidance: &str) -> Result<NarrativeId> {
        self.synthesize_with_cancel(feed_id, topic, guidance, &CancellationToken::new())
            .await
    }

    /// Same as [`Synthesizer::synthesize`], returning [`Error::Cancelled`] if `cancel` fires
    /// before the response is in hand. Nothing is written for the narrative in that case.
    pub async fn synthesize_with_cancel(
        &self,
        feed_id: FeedId,
        topic: &str,
        guidance: &str,
        cancel: &CancellationToken,
    ) -> Result<NarrativeId> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!(feed_id = %feed_id, topic = %topic, "synthesizer: starting synthesis");

        let article_ids = self.seeker.fetch(feed_id, topic).await?;
        let articles = self.load_articles(&article_ids).await;

        let prompt = build_prompt(topic, &articles, guidance);
        let response = self.generate(feed_id, topic, &prompt, cancel).await?;

        let (title, body) = split_title_body(&response);

        let mut metadata = HashMap::new();
        metadata.insert("topic".to_string(), topic.to_string());

        let narrative = NewNarrative {
            feed_id,
            title,
            body,
            article_ids,
            prompt,
        };
        let entry = NewContextEntry {
            content_type: CONTEXT_TYPE_NARRATIVE.to_string(),
            text: response,
            embedding: None,
            metadata,
        };
        let narrative_id = self
            .repo
            .create_narrative_with_context(&narrative, &entry)
            .await
            .map_err(Error::Persistence)?;

        info!(feed_id = %feed_id, narrative_id = %narrative_id, "synthesizer: narrative stored");
        Ok(narrative_id)
    }

    /// Ids that do not resolve are skipped.
    async fn load_articles(&self, ids: &[ArticleId]) -> Vec<Article> {
        let mut articles = Vec::with_capacity(ids.len());
        for &id in ids {
            match self.repo.get_article(id).await {
                Ok(Some(article)) => articles.push(article),
                Ok(None) => warn!(article_id = %id, "synthesizer: article not found, skipping"),
                Err(e) => warn!(article_id = %id, "synthesizer: failed to load article, skipping: {:#}", e),
            }
        }
        articles
    }

    /// Response text, or the placeholder narrative when the service fails or times out.
    async fn generate(
        &self,
        feed_id: FeedId,
        topic: &str,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let request = LlmRequest {
            system: Some(SYSTEM_INSTRUCTION.to_string()),
            prompt: prompt.to_string(),
            max_tokens: Some(self.options.max_tokens),
            temperature: Some(self.options.temperature),
            timeout_seconds: Some(self.options.timeout_seconds),
        };
        let timeout = Duration::from_secs(self.options.timeout_seconds);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(feed_id = %feed_id, topic = %topic, "synthesizer: cancelled during completion call");
                return Err(Error::Cancelled);
            }
            result = tokio::time::timeout(timeout, self.llm.generate(request)) => result,
        };

        let failure = match outcome {
            Ok(Ok(response)) if !response.content.trim().is_empty() => {
                info!(
                    feed_id = %feed_id,
                    model = %response.model,
                    total_tokens = response.usage.total_tokens,
                    "synthesizer: completion received"
                );
                return Ok(response.content.trim().to_string());
            }
            Ok(Ok(_)) => "completion service returned an empty response".to_string(),
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!(
                "completion service timed out after {}s",
                self.options.timeout_seconds
            ),
        };

        error!(feed_id = %feed_id, topic = %topic, service = "completion", "synthesizer: generation failed, using placeholder: {}", failure);
        Ok(placeholder_narrative(&failure))
    }
}

/// Prompt sent to the completion service. Articles are numbered from 1; the guidance line is
/// present only when guidance is non-blank.
pub fn build_prompt(topic: &str, articles: &[Article], guidance: &str) -> String {
    let mut articles_text = String::new();
    for (i, article) in articles.iter().enumerate() {
        let authors = if article.authors.is_empty() {
            "Unknown".to_string()
        } else {
            article.authors.join(", ")
        };
        articles_text.push_str(&format!("\n\n--- Article {} ---\n", i + 1));
        articles_text.push_str(&format!("Title: {}\n", article.title));
        articles_text.push_str(&format!("Authors: {}\n", authors));
        articles_text.push_str(&format!("Abstract: {}\n", article.abstract_text));
        if !article.url.is_empty() {
            articles_text.push_str(&format!("URL: {}\n", article.url));
        }
    }

    let guidance_text = if guidance.trim().is_empty() {
        String::new()
    } else {
        format!("\n\nSynthesis guidance: {}", guidance)
    };

    format!(
        r#"You are a contemplative academic synthesizer. Create a thoughtful narrative that weaves together insights from these research articles about {topic}.

Your narrative should:
- Begin with a compelling title (start with #)
- Synthesize themes and connections across the articles
- Highlight practical implications and future directions
- Be written in a contemplative, readable style that invites deep thinking
- Include relevant citations and links where appropriate
- Be substantive but not overwhelming (aim for 800-1200 words)

Articles to synthesize:{articles_text}{guidance_text}

Create a narrative that helps readers understand the current state and future possibilities in this field:"#
    )
}

/// Split generated text into `(title, body)`.
///
/// The first line, minus any leading `#` heading marker, is the title; the remaining lines are
/// the body. A single-line response is used whole as the body and also yields the title, so
/// both carry the same text. Empty input gives [`UNTITLED`] and an empty body.
pub fn split_title_body(text: &str) -> (String, String) {
    let text = text.trim();
    let lines: Vec<&str> = text.lines().collect();

    let title = lines
        .first()
        .map(|first| first.trim().trim_start_matches('#').trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let body = if lines.len() > 1 {
        lines[1..].join("\n").trim().to_string()
    } else {
        text.to_string()
    };

    (title, body)
}

/// Narrative text used when the completion service could not produce one
pub fn placeholder_narrative(error: &str) -> String {
    format!(
        r#"# Synthesis Pending

The Synthesizer encountered an issue generating content: {error}

Please check the completion service configuration and API key. In the meantime, here's a placeholder narrative about the gathered research.

This synthesis would normally weave together insights from the collected articles, highlighting key themes, practical applications, and future research directions in a contemplative format that invites deep reading and reflection.

*Note: set the configured API key environment variable (OPENAI_API_KEY by default) to enable full synthesis.*"#
    )
}
