//! Embedding and generation providers.
//!
//! Two families: deterministic in-process stubs for offline use and
//! tests, and HTTP providers speaking the OpenAI-compatible API.
//! Providers are single-attempt; the pipeline owns retry policy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use docqa_core::error::{CoreError, Result};
use docqa_core::provider::{Embedder, Generator};

use crate::config::{EmbeddingConfig, GenerationConfig};

/// Build the configured embedder.
pub fn create_embedder(cfg: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match cfg.provider.as_str() {
        "stub" => Ok(Arc::new(StubEmbedder::new(&cfg.model, cfg.dims))),
        "openai" => Ok(Arc::new(HttpEmbedder::new(cfg)?)),
        other => anyhow::bail!("unknown embedding provider: {other}"),
    }
}

/// Build the configured generator.
pub fn create_generator(cfg: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match cfg.provider.as_str() {
        "stub" => Ok(Arc::new(StubGenerator::new(&cfg.model))),
        "openai" => Ok(Arc::new(HttpGenerator::new(cfg)?)),
        other => anyhow::bail!("unknown generation provider: {other}"),
    }
}

/// Deterministic embedder: vectors are derived from a SHA-256 stream
/// over the text, so equal text always embeds to equal vectors.
pub struct StubEmbedder {
    model: String,
    dims: usize,
    calls: AtomicU64,
    delay: Option<Duration>,
    fail: bool,
}

impl StubEmbedder {
    pub fn new(model: &str, dims: usize) -> Self {
        Self {
            model: model.to_string(),
            dims,
            calls: AtomicU64::new(0),
            delay: None,
            fail: false,
        }
    }

    /// Sleep before answering, to widen concurrency windows in tests.
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Some(Duration::from_millis(ms));
        self
    }

    /// Fail every call with a transient error.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Number of `embed` invocations so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut values = Vec::with_capacity(self.dims);
        let mut counter: u64 = 0;
        while values.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks_exact(4) {
                if values.len() == self.dims {
                    break;
                }
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                // Map to [-1, 1].
                values.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }
        values
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(CoreError::EmbeddingUnavailable(
                "stub embedder configured to fail".into(),
            ));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Deterministic generator that restates the prompt's question line.
pub struct StubGenerator {
    model: String,
}

impl StubGenerator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let excerpt: String = prompt.chars().take(200).collect();
        Ok(format!("[{}] {}", self.model, excerpt))
    }
}

fn api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| CoreError::InvalidArgument("OPENAI_API_KEY is not set".into()))
}

/// Map a single HTTP attempt's status to an error family. Throttling
/// and server faults are transient; other client errors are not.
fn status_error(status: reqwest::StatusCode, body: &str, transient: fn(String) -> CoreError) -> CoreError {
    let reason = format!("api error {status}: {body}");
    if status.as_u16() == 429 || status.is_server_error() {
        transient(reason)
    } else {
        CoreError::InvalidArgument(reason)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_base: String,
    model: String,
    dims: usize,
}

impl HttpEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            dims: cfg.dims,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_version(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let key = api_key()?;
        let url = format!("{}/embeddings", self.api_base);
        debug!(batch = texts.len(), model = %self.model, "embedding request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| CoreError::EmbeddingUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, CoreError::EmbeddingUnavailable));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CoreError::EmbeddingUnavailable(e.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(CoreError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpGenerator {
    client: reqwest::Client,
    api_base: String,
    model: String,
}

impl HttpGenerator {
    pub fn new(cfg: &GenerationConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_base: cfg.api_base.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
        })
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let key = api_key()?;
        let url = format!("{}/chat/completions", self.api_base);
        debug!(model = %self.model, "generation request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&key)
            .json(&ChatRequest {
                model: &self.model,
                messages: vec![ChatMessage {
                    role: "user".into(),
                    content: prompt.to_string(),
                }],
            })
            .send()
            .await
            .map_err(|e| CoreError::GenerationUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body, CoreError::GenerationUnavailable));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CoreError::GenerationUnavailable(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::GenerationUnavailable("empty choices".into()))?;
        Ok(choice.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_embedder_deterministic() {
        let embedder = StubEmbedder::new("stub-v1", 16);
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let first = embedder.embed(&texts).await.unwrap();
        let second = embedder.embed(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].len(), 16);
        assert_ne!(first[0], first[1]);
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn test_stub_embedder_failing_is_transient() {
        let embedder = StubEmbedder::new("stub-v1", 4).failing();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_stub_generator_mentions_prompt() {
        let generator = StubGenerator::new("stub-gen");
        let out = generator.generate("what is rust?").await.unwrap();
        assert!(out.contains("what is rust?"));
    }

    #[test]
    fn test_status_error_families() {
        let transient = status_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
            CoreError::EmbeddingUnavailable,
        );
        assert!(transient.is_transient());

        let fatal = status_error(
            reqwest::StatusCode::BAD_REQUEST,
            "bad input",
            CoreError::EmbeddingUnavailable,
        );
        assert!(!fatal.is_transient());
    }
}
