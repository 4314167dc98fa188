//! Core data models that flow through the ingestion and query pipeline.
//!
//! A [`Document`] is immutable once ingested. Its [`Fragment`]s carry a
//! deterministic id derived from `(document_id, start_offset, length)`
//! so that re-chunking identical text yields identical ids — the
//! property the content cache and the reproducibility tests rely on.
//! Fragments hold only an id back-reference to their document, never an
//! ownership pointer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An ingested source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable id, caller-assigned or generated at ingest.
    pub id: String,
    /// Human-readable origin (file name, upload name).
    pub source_name: String,
    /// Full raw text.
    pub text: String,
    /// Ingestion timestamp.
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(id: impl Into<String>, source_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_name: source_name.into(),
            text: text.into(),
            ingested_at: Utc::now(),
        }
    }
}

/// A contiguous slice of a document's text — the unit of embedding and
/// retrieval.
///
/// Offsets are character offsets into the source text. Consecutive
/// fragments of one document overlap by at most the configured overlap
/// window; with overlap 0 their concatenation in `sequence_index`
/// order reproduces the source text exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Deterministic id: hex SHA-256 of `document_id:start:length`.
    pub id: String,
    /// Owning document's id (back-reference, not ownership).
    pub document_id: String,
    /// Fragment text.
    pub text: String,
    /// Start character offset (inclusive).
    pub start_offset: usize,
    /// End character offset (exclusive).
    pub end_offset: usize,
    /// Position among fragments of the same document, from 0.
    pub sequence_index: usize,
}

impl Fragment {
    /// Derive the deterministic fragment id.
    pub fn derive_id(document_id: &str, start_offset: usize, length: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        hasher.update(b":");
        hasher.update(start_offset.to_le_bytes());
        hasher.update(b":");
        hasher.update(length.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Fragment length in characters.
    pub fn char_len(&self) -> usize {
        self.end_offset - self.start_offset
    }
}

/// A fixed-dimension embedding of one fragment's text.
///
/// Created once per unique fragment content and never mutated; freely
/// shareable across threads without locking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub fragment_id: String,
    pub values: Vec<f32>,
    /// Tag of the model that produced the vector. All vectors in one
    /// index share this tag.
    pub model_version: String,
}

/// One ranked hit from a nearest-neighbor search.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub fragment_id: String,
    /// Denormalized for diversity filtering and deletion-by-document.
    pub document_id: String,
    /// Similarity score; higher is more relevant.
    pub score: f32,
    /// Position in the result list, from 0.
    pub rank: usize,
}

/// The ordered, budget-bounded fragment set handed to generation.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    /// Fragments ordered by `(document_id, sequence_index)`.
    pub fragments: Vec<Fragment>,
    /// Sum of included fragment lengths in characters; never exceeds
    /// the budget it was assembled under.
    pub total_size: usize,
}

impl ContextWindow {
    /// Concatenate the window's fragment texts for prompt building.
    pub fn joined_text(&self, separator: &str) -> String {
        self.fragments
            .iter()
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Ids of the fragments included in the window, in window order.
    pub fn fragment_ids(&self) -> Vec<String> {
        self.fragments.iter().map(|f| f.id.clone()).collect()
    }
}
