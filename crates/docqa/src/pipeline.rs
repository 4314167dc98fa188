//! Pipeline orchestrator.
//!
//! Owns the full document lifecycle: chunk, embed (through the content
//! cache), publish to the vector index, answer questions, summarize,
//! and persist snapshots. Document records move through a small state
//! machine — `Ingesting` until the index publish, `Indexed` while
//! queryable, `Deleting` while being torn down — and queries only ever
//! see `Indexed` records, so a failed or in-flight ingest is invisible.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use docqa_core::assembler;
use docqa_core::chunker::Chunker;
use docqa_core::error::{CoreError, Result};
use docqa_core::index::{IndexEntry, VectorIndex};
use docqa_core::models::{Document, Fragment};
use docqa_core::provider::{Embedder, Generator};
use docqa_core::retriever::Retriever;

use crate::cache::ContentCache;
use crate::config::{Config, PersistMode};
use crate::snapshot::{CacheEntry, CorpusSnapshot, DocumentEntry, SnapshotStore, SNAPSHOT_VERSION};

/// A generated answer with the fragment ids that backed it.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub cited_fragment_ids: Vec<String>,
}

/// Corpus counters for the `stats` command.
#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub documents: usize,
    pub fragments: usize,
    pub index_entries: usize,
    pub index_dimension: Option<usize>,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_computations: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentState {
    Ingesting,
    Indexed,
    Deleting,
}

struct DocumentRecord {
    document: Document,
    fragments: Vec<Fragment>,
    state: DocumentState,
}

pub struct Pipeline {
    config: Config,
    chunker: Chunker,
    retriever: Retriever,
    index: VectorIndex,
    cache: ContentCache,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    documents: RwLock<HashMap<String, DocumentRecord>>,
    store: Option<SnapshotStore>,
    dirty: AtomicBool,
}

impl Pipeline {
    /// Build a pipeline, restoring state from `store` if a snapshot
    /// exists. Fails fast when a snapshot was produced by a different
    /// embedding model than the one configured.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: Option<SnapshotStore>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let chunker = Chunker::new(config.chunker_config()?);
        let retriever = Retriever::new(config.retriever_config());
        let cache = ContentCache::new(config.cache.max_entries);

        let mut documents = HashMap::new();
        let mut warm_entries: Vec<(String, Vec<f32>)> = Vec::new();
        let index = match store.as_ref().and_then(|s| s.load().transpose()) {
            Some(loaded) => {
                let snapshot = loaded?;
                if snapshot.index.model_version != embedder.model_version() {
                    return Err(CoreError::ModelVersionMismatch {
                        expected: embedder.model_version().to_string(),
                        got: snapshot.index.model_version.clone(),
                    }
                    .into());
                }
                let index = VectorIndex::restore(snapshot.index)?;
                for entry in snapshot.documents {
                    documents.insert(
                        entry.document.id.clone(),
                        DocumentRecord {
                            document: entry.document,
                            fragments: entry.fragments,
                            state: DocumentState::Indexed,
                        },
                    );
                }
                warm_entries = snapshot
                    .cache
                    .into_iter()
                    .map(|e| (e.key, e.values))
                    .collect();
                info!(
                    documents = documents.len(),
                    cached = warm_entries.len(),
                    "restored corpus snapshot"
                );
                index
            }
            None => VectorIndex::new(config.retrieval.metric, embedder.model_version()),
        };
        cache.seed(warm_entries);

        Ok(Self {
            config,
            chunker,
            retriever,
            index,
            cache,
            embedder,
            generator,
            documents: RwLock::new(documents),
            store,
            dirty: AtomicBool::new(false),
        })
    }

    /// Build providers and the snapshot store from configuration.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder = crate::providers::create_embedder(&config.embedding)?;
        let generator = crate::providers::create_generator(&config.generation)?;
        let store = config.persistence.path.clone().map(SnapshotStore::new);
        Self::new(config, embedder, generator, store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    /// Chunk, embed, and index one document. The index swap at the end
    /// is atomic: until it happens, queries see the previous corpus
    /// (including any previous version of this document), and a failure
    /// before it leaves the corpus untouched.
    pub async fn ingest_document(
        &self,
        source_name: &str,
        text: &str,
        id: Option<String>,
    ) -> anyhow::Result<Document> {
        let document_id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let document = Document::new(document_id.clone(), source_name, text);
        let fragments = self.chunker.chunk(&document)?;

        // Register a placeholder for brand-new documents so deletes and
        // stats can see the ingest; re-ingests keep the old record
        // (still queryable) until the new version publishes.
        let is_new = {
            let mut docs = self.documents.write().expect("document lock poisoned");
            if docs.contains_key(&document_id) {
                false
            } else {
                docs.insert(
                    document_id.clone(),
                    DocumentRecord {
                        document: document.clone(),
                        fragments: Vec::new(),
                        state: DocumentState::Ingesting,
                    },
                );
                true
            }
        };

        let batch_size = self.config.embedding.batch_size;
        let embedded = with_retry(
            self.config.embedding.max_retries,
            self.config.embedding.backoff_ms,
            "embed",
            || self.cache.embed_fragments(&fragments, self.embedder.as_ref(), batch_size),
        )
        .await;

        let vectors = match embedded {
            Ok(vectors) => vectors,
            Err(e) => {
                if is_new {
                    let mut docs = self.documents.write().expect("document lock poisoned");
                    docs.remove(&document_id);
                }
                return Err(e.into());
            }
        };

        let entries: Vec<IndexEntry> = vectors
            .into_iter()
            .map(|v| IndexEntry {
                fragment_id: v.fragment_id,
                document_id: document_id.clone(),
                vector: v.values,
            })
            .collect();

        if let Err(e) = self.index.replace_document(&document_id, entries) {
            if is_new {
                let mut docs = self.documents.write().expect("document lock poisoned");
                docs.remove(&document_id);
            }
            return Err(e.into());
        }

        {
            let mut docs = self.documents.write().expect("document lock poisoned");
            docs.insert(
                document_id.clone(),
                DocumentRecord {
                    document: document.clone(),
                    fragments: fragments.clone(),
                    state: DocumentState::Indexed,
                },
            );
        }
        info!(
            document_id = %document_id,
            source = source_name,
            fragments = fragments.len(),
            "document indexed"
        );
        self.mark_dirty()?;
        Ok(document)
    }

    /// Remove a document and all its index entries. Deleting a missing
    /// document is a no-op; returns whether anything was removed.
    pub async fn delete_document(&self, document_id: &str) -> anyhow::Result<bool> {
        {
            let mut docs = self.documents.write().expect("document lock poisoned");
            match docs.get_mut(document_id) {
                None => return Ok(false),
                Some(record) => record.state = DocumentState::Deleting,
            }
        }
        self.index.delete_document(document_id);
        {
            let mut docs = self.documents.write().expect("document lock poisoned");
            docs.remove(document_id);
        }
        info!(document_id = %document_id, "document deleted");
        self.mark_dirty()?;
        Ok(true)
    }

    /// Retrieve context for a question and generate an answer citing
    /// the fragments that were used.
    pub async fn answer_question(
        &self,
        question: &str,
        k: Option<i64>,
        budget: Option<usize>,
    ) -> anyhow::Result<Answer> {
        let k = k.unwrap_or(self.config.retrieval.k);
        let budget = budget.unwrap_or(self.config.context.budget);

        let query = self.embed_query(question).await?;
        let results = self.retriever.retrieve(&self.index, &query, k)?;
        let fragments = self.resolve_fragments(results.iter().map(|r| (&r.document_id, &r.fragment_id)));
        if fragments.is_empty() {
            return Ok(Answer {
                text: "No indexed content matched the question.".to_string(),
                cited_fragment_ids: Vec::new(),
            });
        }

        let window = assembler::assemble(&fragments, budget)?;
        let prompt = format!(
            "Answer the question using only the context below.\n\nContext:\n{}\n\nQuestion: {}",
            window.joined_text("\n---\n"),
            question
        );
        let text = self.generate(&prompt).await?;
        Ok(Answer {
            text,
            cited_fragment_ids: window.fragment_ids(),
        })
    }

    /// Summarize the given documents within a context budget.
    pub async fn summarize(
        &self,
        document_ids: &[String],
        budget: Option<usize>,
    ) -> anyhow::Result<Answer> {
        let budget = budget.unwrap_or(self.config.context.budget);
        let fragments = {
            let docs = self.documents.read().expect("document lock poisoned");
            let mut fragments = Vec::new();
            for id in document_ids {
                let record = docs
                    .get(id)
                    .filter(|r| r.state == DocumentState::Indexed)
                    .ok_or_else(|| CoreError::DocumentNotFound(id.clone()))?;
                fragments.extend(record.fragments.iter().cloned());
            }
            fragments
        };

        let window = assembler::assemble(&fragments, budget)?;
        let prompt = format!(
            "Summarize the following content concisely.\n\n{}",
            window.joined_text("\n---\n")
        );
        let text = self.generate(&prompt).await?;
        Ok(Answer {
            text,
            cited_fragment_ids: window.fragment_ids(),
        })
    }

    /// Persist the corpus if a snapshot path is configured.
    pub fn flush(&self) -> anyhow::Result<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        let documents = {
            let docs = self.documents.read().expect("document lock poisoned");
            docs.values()
                .filter(|r| r.state == DocumentState::Indexed)
                .map(|r| DocumentEntry {
                    document: r.document.clone(),
                    fragments: r.fragments.clone(),
                })
                .collect()
        };
        store.save(&CorpusSnapshot {
            version: SNAPSHOT_VERSION,
            index: self.index.snapshot(),
            documents,
            cache: self
                .cache
                .export()
                .into_iter()
                .map(|(key, values)| CacheEntry { key, values })
                .collect(),
        })?;
        self.dirty.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Whether in-memory state has diverged from the last snapshot.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> Stats {
        let docs = self.documents.read().expect("document lock poisoned");
        let indexed: Vec<_> = docs
            .values()
            .filter(|r| r.state == DocumentState::Indexed)
            .collect();
        Stats {
            documents: indexed.len(),
            fragments: indexed.iter().map(|r| r.fragments.len()).sum(),
            index_entries: self.index.len(),
            index_dimension: self.index.dimension(),
            cache_entries: self.cache.len(),
            cache_hits: self.cache.hits(),
            cache_computations: self.cache.computations(),
        }
    }

    fn mark_dirty(&self) -> anyhow::Result<()> {
        self.dirty.store(true, Ordering::Relaxed);
        if self.store.is_some() && self.config.persistence.mode == PersistMode::WriteThrough {
            self.flush()?;
        }
        Ok(())
    }

    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        let texts = vec![question.to_string()];
        let mut vectors = with_retry(
            self.config.embedding.max_retries,
            self.config.embedding.backoff_ms,
            "embed query",
            || self.embedder.embed(&texts),
        )
        .await?;
        if vectors.is_empty() {
            return Err(CoreError::EmbeddingUnavailable(
                "embedder returned no vectors".into(),
            ));
        }
        Ok(vectors.remove(0))
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        with_retry(
            self.config.generation.max_retries,
            self.config.generation.backoff_ms,
            "generate",
            || self.generator.generate(prompt),
        )
        .await
    }

    /// Map retrieval results back to fragments, skipping anything whose
    /// document is no longer indexed (deleted mid-query).
    fn resolve_fragments<'a>(
        &self,
        refs: impl Iterator<Item = (&'a String, &'a String)>,
    ) -> Vec<Fragment> {
        let docs = self.documents.read().expect("document lock poisoned");
        let mut fragments = Vec::new();
        for (document_id, fragment_id) in refs {
            let Some(record) = docs.get(document_id) else {
                continue;
            };
            if record.state != DocumentState::Indexed {
                continue;
            }
            if let Some(fragment) = record.fragments.iter().find(|f| &f.id == fragment_id) {
                fragments.push(fragment.clone());
            }
        }
        fragments
    }
}

/// Retry a transient-failing operation with bounded exponential
/// backoff. Non-transient errors surface immediately; exhausting the
/// retry budget yields [`CoreError::DependencyUnavailable`].
async fn with_retry<T, F, Fut>(
    max_retries: u32,
    backoff_ms: u64,
    op_name: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt <= max_retries => {
                let delay = backoff_ms * (1u64 << (attempt - 1).min(5));
                warn!(op = op_name, attempt, delay_ms = delay, error = %e, "transient failure, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) if e.is_transient() => {
                return Err(CoreError::DependencyUnavailable {
                    attempts: attempt,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    use async_trait::async_trait;

    struct FlakyEmbedder {
        calls: AtomicU64,
        succeed_after: u64,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn model_version(&self) -> &str {
            "flaky-v1"
        }

        fn dims(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
            if call <= self.succeed_after {
                return Err(CoreError::EmbeddingUnavailable("throttled".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_failures() {
        let embedder = FlakyEmbedder {
            calls: AtomicU64::new(0),
            succeed_after: 2,
        };
        let texts = vec!["q".to_string()];
        let out = with_retry(3, 1, "embed", || embedder.embed(&texts))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(embedder.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_with_retry_exhaustion_reports_attempts() {
        let embedder = FlakyEmbedder {
            calls: AtomicU64::new(0),
            succeed_after: u64::MAX,
        };
        let texts = vec!["q".to_string()];
        let err = with_retry(2, 1, "embed", || embedder.embed(&texts))
            .await
            .unwrap_err();
        match err {
            CoreError::DependencyUnavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_with_retry_fatal_error_is_immediate() {
        let calls = AtomicU64::new(0);
        let err = with_retry(5, 1, "op", || {
            calls.fetch_add(1, Ordering::Relaxed);
            async { Err::<(), _>(CoreError::InvalidArgument("bad".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }
}
