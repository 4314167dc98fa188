//! Exact nearest-neighbor vector index with copy-on-write generations.
//!
//! The index stores `fragment_id → vector` entries (plus a denormalized
//! `document_id` for deletion-by-document) and answers brute-force
//! k-nearest-neighbor queries under a metric fixed at construction.
//!
//! # Concurrency
//!
//! Visible state is an immutable [`IndexGeneration`] behind
//! `RwLock<Arc<..>>`. Writers build the next generation off to the side
//! and publish it with a single `Arc` swap; [`search`](VectorIndex::search)
//! clones the current `Arc` and then runs lock-free against one whole,
//! consistent generation. A reader can never observe a partially
//! inserted document, and abandoning a search mid-operation leaves no
//! state to clean up.
//!
//! # Determinism
//!
//! Exact score ties are broken by ascending `fragment_id`. Search is
//! exact (no approximate mode).

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::models::RetrievalResult;

/// Similarity metric, fixed when the index is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    /// Cosine similarity, in `[-1.0, 1.0]`.
    Cosine,
    /// Negative squared Euclidean distance (higher = closer).
    NegEuclidean,
}

impl SimilarityMetric {
    /// Score two same-length vectors; higher is more similar.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            SimilarityMetric::Cosine => cosine_similarity(a, b),
            SimilarityMetric::NegEuclidean => neg_squared_euclidean(a, b),
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Negative squared Euclidean distance; `0.0` is a perfect match.
pub fn neg_squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::NEG_INFINITY;
    }
    -a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
}

/// One stored entry: a fragment's vector plus its owning document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub fragment_id: String,
    pub document_id: String,
    pub vector: Vec<f32>,
}

/// One immutable, fully consistent view of the index.
#[derive(Debug, Default)]
struct IndexGeneration {
    /// Keyed by fragment id; `BTreeMap` keeps iteration deterministic.
    entries: BTreeMap<String, IndexEntry>,
    /// Established by the first insert; all entries share it.
    dimension: Option<usize>,
}

/// Serializable snapshot of the index's durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub metric: SimilarityMetric,
    pub model_version: String,
    pub dimension: Option<usize>,
    /// Redundant count, checked against `entries.len()` at restore to
    /// detect truncated snapshots.
    pub entry_count: usize,
    pub entries: Vec<IndexEntry>,
}

/// Exact k-NN index over fragment embeddings.
#[derive(Debug)]
pub struct VectorIndex {
    metric: SimilarityMetric,
    model_version: String,
    state: RwLock<Arc<IndexGeneration>>,
}

impl VectorIndex {
    /// Create an empty index. The dimension is established by the
    /// first inserted vector.
    pub fn new(metric: SimilarityMetric, model_version: impl Into<String>) -> Self {
        Self {
            metric,
            model_version: model_version.into(),
            state: RwLock::new(Arc::new(IndexGeneration::default())),
        }
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().entries.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.current().dimension
    }

    fn current(&self) -> Arc<IndexGeneration> {
        self.state.read().expect("index lock poisoned").clone()
    }

    fn check_dimension(dimension: Option<usize>, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            return Err(CoreError::InvalidArgument(
                "vector must not be empty".into(),
            ));
        }
        if let Some(expected) = dimension {
            if vector.len() != expected {
                return Err(CoreError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }
        Ok(())
    }

    /// Add or replace a single entry.
    ///
    /// Fails with [`CoreError::DimensionMismatch`] when the vector's
    /// dimension disagrees with the index's established dimension.
    pub fn insert(
        &self,
        fragment_id: impl Into<String>,
        document_id: impl Into<String>,
        vector: Vec<f32>,
    ) -> Result<()> {
        let entry = IndexEntry {
            fragment_id: fragment_id.into(),
            document_id: document_id.into(),
            vector,
        };
        let mut guard = self.state.write().expect("index lock poisoned");
        Self::check_dimension(guard.dimension, &entry.vector)?;

        let mut next = IndexGeneration {
            entries: guard.entries.clone(),
            dimension: guard.dimension.or(Some(entry.vector.len())),
        };
        next.entries.insert(entry.fragment_id.clone(), entry);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Replace all entries for a document in one atomic publish.
    ///
    /// The new generation is built off to the side while readers keep
    /// serving the previous one; concurrent searches see either none or
    /// all of the document's fragments, never a torn subset.
    pub fn replace_document(&self, document_id: &str, entries: Vec<IndexEntry>) -> Result<()> {
        let mut guard = self.state.write().expect("index lock poisoned");
        let mut dimension = guard.dimension;
        for entry in &entries {
            Self::check_dimension(dimension, &entry.vector)?;
            dimension = dimension.or(Some(entry.vector.len()));
            if entry.document_id != document_id {
                return Err(CoreError::InvalidArgument(format!(
                    "entry {} belongs to document {}, not {}",
                    entry.fragment_id, entry.document_id, document_id
                )));
            }
        }

        let mut next_entries = guard.entries.clone();
        next_entries.retain(|_, e| e.document_id != document_id);
        for entry in entries {
            next_entries.insert(entry.fragment_id.clone(), entry);
        }
        *guard = Arc::new(IndexGeneration {
            entries: next_entries,
            dimension,
        });
        Ok(())
    }

    /// Remove all entries for a document. Idempotent: a document with
    /// no entries is a no-op, not an error.
    pub fn delete_document(&self, document_id: &str) {
        let mut guard = self.state.write().expect("index lock poisoned");
        if !guard.entries.values().any(|e| e.document_id == document_id) {
            return;
        }
        let mut next_entries = guard.entries.clone();
        next_entries.retain(|_, e| e.document_id != document_id);
        *guard = Arc::new(IndexGeneration {
            entries: next_entries,
            dimension: guard.dimension,
        });
    }

    /// Return up to `k` entries ranked by descending similarity.
    ///
    /// Exact ties are broken by ascending `fragment_id`. An empty index
    /// returns an empty vec; `k ≤ 0` is an
    /// [`CoreError::InvalidArgument`].
    pub fn search(&self, query: &[f32], k: i64) -> Result<Vec<RetrievalResult>> {
        if k <= 0 {
            return Err(CoreError::InvalidArgument(format!(
                "k must be > 0, got {k}"
            )));
        }
        let generation = self.current();
        if generation.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = generation.dimension {
            if query.len() != expected {
                return Err(CoreError::DimensionMismatch {
                    expected,
                    got: query.len(),
                });
            }
        }

        let mut scored: Vec<(&IndexEntry, f32)> = generation
            .entries
            .values()
            .map(|e| (e, self.metric.score(query, &e.vector)))
            .collect();
        scored.sort_by(|(ea, sa), (eb, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ea.fragment_id.cmp(&eb.fragment_id))
        });
        scored.truncate(k as usize);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (entry, score))| RetrievalResult {
                fragment_id: entry.fragment_id.clone(),
                document_id: entry.document_id.clone(),
                score,
                rank,
            })
            .collect())
    }

    /// Capture the current generation as a serializable snapshot.
    pub fn snapshot(&self) -> IndexSnapshot {
        let generation = self.current();
        let entries: Vec<IndexEntry> = generation.entries.values().cloned().collect();
        IndexSnapshot {
            metric: self.metric,
            model_version: self.model_version.clone(),
            dimension: generation.dimension,
            entry_count: entries.len(),
            entries,
        }
    }

    /// Rebuild an index from a snapshot, verifying internal consistency.
    ///
    /// A snapshot whose entry count, dimension, or per-entry vector
    /// lengths disagree fails with [`CoreError::SnapshotCorrupt`]
    /// before any state becomes visible.
    pub fn restore(snapshot: IndexSnapshot) -> Result<Self> {
        if snapshot.entry_count != snapshot.entries.len() {
            return Err(CoreError::SnapshotCorrupt(format!(
                "entry_count {} disagrees with {} stored entries",
                snapshot.entry_count,
                snapshot.entries.len()
            )));
        }
        match (snapshot.dimension, snapshot.entries.is_empty()) {
            (None, false) => {
                return Err(CoreError::SnapshotCorrupt(
                    "entries present but no dimension recorded".into(),
                ));
            }
            (Some(dim), _) => {
                for entry in &snapshot.entries {
                    if entry.vector.len() != dim {
                        return Err(CoreError::SnapshotCorrupt(format!(
                            "entry {} has dimension {}, index dimension is {}",
                            entry.fragment_id,
                            entry.vector.len(),
                            dim
                        )));
                    }
                }
            }
            (None, true) => {}
        }

        let entries: BTreeMap<String, IndexEntry> = snapshot
            .entries
            .into_iter()
            .map(|e| (e.fragment_id.clone(), e))
            .collect();
        Ok(Self {
            metric: snapshot.metric,
            model_version: snapshot.model_version,
            state: RwLock::new(Arc::new(IndexGeneration {
                entries,
                dimension: snapshot.dimension,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> VectorIndex {
        VectorIndex::new(SimilarityMetric::Cosine, "stub-v1")
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_neg_euclidean_ordering() {
        let q = [1.0, 1.0];
        let close = neg_squared_euclidean(&q, &[1.0, 1.1]);
        let far = neg_squared_euclidean(&q, &[3.0, 3.0]);
        assert!(close > far);
        assert_eq!(neg_squared_euclidean(&q, &q), 0.0);
    }

    #[test]
    fn test_empty_index_search_returns_empty() {
        let results = index().search(&[1.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_k_zero_rejected() {
        let err = index().search(&[1.0], 0).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        let err = index().search(&[1.0], -3).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_dimension_established_and_enforced() {
        let idx = index();
        idx.insert("f1", "d1", vec![1.0, 0.0, 0.0]).unwrap();
        let err = idx.insert("f2", "d1", vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DimensionMismatch {
                expected: 3,
                got: 2
            }
        ));
        let err = idx.search(&[1.0], 3).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_search_ranks_by_similarity() {
        let idx = index();
        idx.insert("f1", "d1", vec![1.0, 0.0]).unwrap();
        idx.insert("f2", "d1", vec![0.0, 1.0]).unwrap();
        idx.insert("f3", "d2", vec![0.7, 0.7]).unwrap();

        let results = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(results[0].fragment_id, "f1");
        assert_eq!(results[1].fragment_id, "f3");
        assert_eq!(results[2].fragment_id, "f2");
        assert_eq!(
            results.iter().map(|r| r.rank).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_exact_ties_broken_by_ascending_fragment_id() {
        let idx = index();
        // Same direction, so identical cosine scores.
        idx.insert("zz", "d1", vec![2.0, 0.0]).unwrap();
        idx.insert("aa", "d2", vec![1.0, 0.0]).unwrap();
        idx.insert("mm", "d3", vec![3.0, 0.0]).unwrap();

        let results = idx.search(&[1.0, 0.0], 3).unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.fragment_id.as_str()).collect();
        assert_eq!(order, vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn test_insert_replaces_existing_entry() {
        let idx = index();
        idx.insert("f1", "d1", vec![1.0, 0.0]).unwrap();
        idx.insert("f1", "d1", vec![0.0, 1.0]).unwrap();
        assert_eq!(idx.len(), 1);
        let results = idx.search(&[0.0, 1.0], 1).unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_delete_document_idempotent() {
        let idx = index();
        idx.insert("f1", "d1", vec![1.0, 0.0]).unwrap();
        idx.insert("f2", "d1", vec![0.0, 1.0]).unwrap();
        idx.insert("f3", "d2", vec![0.5, 0.5]).unwrap();

        idx.delete_document("d1");
        assert_eq!(idx.len(), 1);
        // Repeated and unknown deletes are no-ops.
        idx.delete_document("d1");
        idx.delete_document("never-existed");
        assert_eq!(idx.len(), 1);

        let results = idx.search(&[1.0, 0.0], 10).unwrap();
        assert!(results.iter().all(|r| r.document_id == "d2"));
    }

    #[test]
    fn test_replace_document_is_atomic_swap() {
        let idx = index();
        idx.replace_document(
            "d1",
            vec![
                IndexEntry {
                    fragment_id: "f1".into(),
                    document_id: "d1".into(),
                    vector: vec![1.0, 0.0],
                },
                IndexEntry {
                    fragment_id: "f2".into(),
                    document_id: "d1".into(),
                    vector: vec![0.0, 1.0],
                },
            ],
        )
        .unwrap();
        assert_eq!(idx.len(), 2);

        // Re-ingest with a different fragment set drops the old one.
        idx.replace_document(
            "d1",
            vec![IndexEntry {
                fragment_id: "f9".into(),
                document_id: "d1".into(),
                vector: vec![0.5, 0.5],
            }],
        )
        .unwrap();
        assert_eq!(idx.len(), 1);
        let results = idx.search(&[1.0, 1.0], 10).unwrap();
        assert_eq!(results[0].fragment_id, "f9");
    }

    #[test]
    fn test_replace_document_rejects_foreign_entries() {
        let idx = index();
        let err = idx
            .replace_document(
                "d1",
                vec![IndexEntry {
                    fragment_id: "f1".into(),
                    document_id: "d2".into(),
                    vector: vec![1.0],
                }],
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let idx = index();
        idx.insert("f1", "d1", vec![1.0, 0.0]).unwrap();
        idx.insert("f2", "d2", vec![0.0, 1.0]).unwrap();

        let restored = VectorIndex::restore(idx.snapshot()).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.dimension(), Some(2));
        assert_eq!(restored.model_version(), "stub-v1");
        let results = restored.search(&[1.0, 0.0], 1).unwrap();
        assert_eq!(results[0].fragment_id, "f1");
    }

    #[test]
    fn test_restore_rejects_corrupt_snapshots() {
        let idx = index();
        idx.insert("f1", "d1", vec![1.0, 0.0]).unwrap();

        let mut snap = idx.snapshot();
        snap.entry_count = 7;
        assert!(matches!(
            VectorIndex::restore(snap).unwrap_err(),
            CoreError::SnapshotCorrupt(_)
        ));

        let mut snap = idx.snapshot();
        snap.entries[0].vector = vec![1.0, 0.0, 0.0];
        assert!(matches!(
            VectorIndex::restore(snap).unwrap_err(),
            CoreError::SnapshotCorrupt(_)
        ));

        let mut snap = idx.snapshot();
        snap.dimension = None;
        assert!(matches!(
            VectorIndex::restore(snap).unwrap_err(),
            CoreError::SnapshotCorrupt(_)
        ));
    }
}
