//! Error taxonomy for the retrieval engine.
//!
//! Errors fall into three families with distinct handling rules:
//!
//! - **Input errors** ([`EmptyDocument`](CoreError::EmptyDocument),
//!   [`DocumentParse`](CoreError::DocumentParse),
//!   [`InvalidArgument`](CoreError::InvalidArgument),
//!   [`DocumentNotFound`](CoreError::DocumentNotFound),
//!   [`NoFragments`](CoreError::NoFragments),
//!   [`EmptyIndex`](CoreError::EmptyIndex)) — surfaced to the caller
//!   unchanged, never retried.
//! - **Consistency errors**
//!   ([`DimensionMismatch`](CoreError::DimensionMismatch),
//!   [`ModelVersionMismatch`](CoreError::ModelVersionMismatch),
//!   [`SnapshotCorrupt`](CoreError::SnapshotCorrupt)) — fatal to the
//!   operation; never coerced (no automatic re-embedding).
//! - **Collaborator errors**
//!   ([`EmbeddingUnavailable`](CoreError::EmbeddingUnavailable),
//!   [`GenerationUnavailable`](CoreError::GenerationUnavailable)) —
//!   transient; the pipeline retries them a bounded number of times
//!   with backoff before surfacing
//!   [`DependencyUnavailable`](CoreError::DependencyUnavailable).

use thiserror::Error;

/// Result alias for retrieval-engine operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by the DocQA retrieval engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Document text was empty or whitespace-only.
    #[error("document text is empty or whitespace-only")]
    EmptyDocument,

    /// A raw input could not be turned into UTF-8 document text.
    #[error("failed to parse document {name}: {reason}")]
    DocumentParse { name: String, reason: String },

    /// A caller-supplied argument was out of range or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The named document is not indexed.
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Context assembly was given an empty fragment list.
    #[error("no fragments to assemble")]
    NoFragments,

    /// The index holds no entries and the retriever is configured to
    /// treat that as an error.
    #[error("vector index is empty")]
    EmptyIndex,

    /// A vector's dimension disagrees with the index's established
    /// dimension.
    #[error("vector dimension {got} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A vector or snapshot was produced by a different embedding
    /// model than the one configured.
    #[error("model version '{got}' does not match configured '{expected}'")]
    ModelVersionMismatch { expected: String, got: String },

    /// A restored snapshot failed its integrity check.
    #[error("snapshot failed integrity check: {0}")]
    SnapshotCorrupt(String),

    /// The embedding backend failed transiently.
    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// The generation backend failed transiently.
    #[error("generation backend unavailable: {0}")]
    GenerationUnavailable(String),

    /// A collaborator kept failing after bounded retries.
    #[error("dependency unavailable after {attempts} attempts: {reason}")]
    DependencyUnavailable { attempts: u32, reason: String },
}

impl CoreError {
    /// Whether the pipeline may retry the failed operation.
    ///
    /// Only collaborator failures are transient; input and consistency
    /// errors must reach the caller unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::EmbeddingUnavailable(_) | CoreError::GenerationUnavailable(_)
        )
    }
}
