//! Capability traits for embedding and generation backends.
//!
//! The pipeline only ever talks to collaborators through these traits,
//! so a real HTTP provider and a deterministic test stub are fully
//! interchangeable. Implementations live in the `docqa` app crate.

use async_trait::async_trait;

use crate::error::Result;

/// An embedding model: text in, fixed-dimension vector out.
///
/// Implementations must be deterministic for identical text and
/// `model_version`, and must report transient failures as
/// [`CoreError::EmbeddingUnavailable`](crate::CoreError::EmbeddingUnavailable).
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Tag of the underlying model (e.g. `"text-embedding-3-small"`).
    /// Vectors from different tags never share an index.
    fn model_version(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// A generative model: prompt in, text out.
///
/// Transient failures surface as
/// [`CoreError::GenerationUnavailable`](crate::CoreError::GenerationUnavailable);
/// the pipeline owns retry policy.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
