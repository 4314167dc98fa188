//! Ranked, diversified retrieval over the vector index.
//!
//! The retriever over-fetches `k × overfetch_factor` candidates from
//! the index, then applies a diversity filter: at most `diversity_cap`
//! fragments per document survive, in score order, before truncating
//! to `k`. Fewer than `k` survivors is a normal outcome — the result
//! is never padded.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{CoreError, Result};
use crate::index::VectorIndex;
use crate::models::RetrievalResult;

/// Retrieval tuning parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrieverConfig {
    /// Candidate over-fetch multiplier applied to `k`.
    pub overfetch_factor: usize,
    /// Maximum fragments per document in the final result.
    pub diversity_cap: usize,
    /// Treat an empty index as [`CoreError::EmptyIndex`] instead of
    /// returning an empty result.
    pub error_on_empty: bool,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 4,
            diversity_cap: 2,
            error_on_empty: false,
        }
    }
}

impl RetrieverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.overfetch_factor == 0 {
            return Err(CoreError::InvalidArgument(
                "overfetch_factor must be > 0".into(),
            ));
        }
        if self.diversity_cap == 0 {
            return Err(CoreError::InvalidArgument(
                "diversity_cap must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Turns a query embedding into a ranked, diversified result list.
#[derive(Debug, Clone)]
pub struct Retriever {
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(config: RetrieverConfig) -> Self {
        Self { config }
    }

    /// Retrieve up to `k` diversified results for a query embedding.
    ///
    /// Only reads the index; safe to abandon mid-operation.
    pub fn retrieve(
        &self,
        index: &VectorIndex,
        query: &[f32],
        k: i64,
    ) -> Result<Vec<RetrievalResult>> {
        if k <= 0 {
            return Err(CoreError::InvalidArgument(format!(
                "k must be > 0, got {k}"
            )));
        }
        if index.is_empty() {
            if self.config.error_on_empty {
                return Err(CoreError::EmptyIndex);
            }
            return Ok(Vec::new());
        }

        let candidate_k = k.saturating_mul(self.config.overfetch_factor as i64);
        let candidates = index.search(query, candidate_k)?;

        let mut per_document: HashMap<String, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(k as usize);
        for candidate in candidates {
            let seen = per_document.entry(candidate.document_id.clone()).or_insert(0);
            if *seen >= self.config.diversity_cap {
                continue;
            }
            *seen += 1;
            kept.push(candidate);
            if kept.len() == k as usize {
                break;
            }
        }

        for (rank, result) in kept.iter_mut().enumerate() {
            result.rank = rank;
        }
        Ok(kept)
    }
}
