//! End-to-end pipeline tests using the deterministic stub providers.

use std::path::PathBuf;
use std::sync::Arc;

use docqa::config::{Config, PersistMode};
use docqa::pipeline::Pipeline;
use docqa::providers::{StubEmbedder, StubGenerator};
use docqa::snapshot::SnapshotStore;

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.chunking.chunk_size = 80;
    cfg.chunking.overlap = 10;
    cfg.chunking.boundary_lookahead = 20;
    cfg.embedding.dims = 16;
    cfg.embedding.max_retries = 0;
    cfg.generation.max_retries = 0;
    cfg
}

fn stub_pipeline(cfg: Config) -> (Pipeline, Arc<StubEmbedder>) {
    let embedder = Arc::new(StubEmbedder::new(&cfg.embedding.model, cfg.embedding.dims));
    let generator = Arc::new(StubGenerator::new(&cfg.generation.model));
    let pipeline = Pipeline::new(cfg, embedder.clone(), generator, None).unwrap();
    (pipeline, embedder)
}

fn persistent_pipeline(cfg: Config, path: PathBuf) -> (Pipeline, Arc<StubEmbedder>) {
    let embedder = Arc::new(StubEmbedder::new(&cfg.embedding.model, cfg.embedding.dims));
    let generator = Arc::new(StubGenerator::new(&cfg.generation.model));
    let store = SnapshotStore::new(path);
    let pipeline = Pipeline::new(cfg, embedder.clone(), generator, Some(store)).unwrap();
    (pipeline, embedder)
}

const RUST_TEXT: &str = "Rust is a systems programming language. It guarantees memory safety \
without a garbage collector. The borrow checker enforces ownership rules at compile time.";

const COOKING_TEXT: &str = "Sourdough bread needs a mature starter. Feed the starter twice a \
day with equal parts flour and water. Bulk fermentation takes four to six hours at room \
temperature.";

#[tokio::test]
async fn test_ingest_and_ask_cites_sources() {
    let (pipeline, _) = stub_pipeline(test_config());
    pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();

    let answer = pipeline
        .answer_question("What enforces ownership rules?", None, None)
        .await
        .unwrap();
    assert!(!answer.text.is_empty());
    assert!(!answer.cited_fragment_ids.is_empty());

    let stats = pipeline.stats();
    assert_eq!(stats.documents, 1);
    assert!(stats.fragments >= 2);
    assert_eq!(stats.index_entries, stats.fragments);
    assert_eq!(stats.index_dimension, Some(16));
}

#[tokio::test]
async fn test_reingesting_identical_text_computes_nothing_new() {
    let (pipeline, _) = stub_pipeline(test_config());
    pipeline
        .ingest_document("a.md", RUST_TEXT, None)
        .await
        .unwrap();
    let computed = pipeline.cache().computations();
    assert!(computed > 0);

    // Same content under a different document id: every fragment is a
    // cache hit.
    pipeline
        .ingest_document("b.md", RUST_TEXT, None)
        .await
        .unwrap();
    assert_eq!(pipeline.cache().computations(), computed);
    assert_eq!(pipeline.stats().documents, 2);
}

#[tokio::test]
async fn test_concurrent_duplicate_ingest_computes_each_fragment_once() {
    let cfg = test_config();
    let embedder = Arc::new(
        StubEmbedder::new(&cfg.embedding.model, cfg.embedding.dims).with_delay_ms(20),
    );
    let generator = Arc::new(StubGenerator::new(&cfg.generation.model));
    let pipeline = Arc::new(Pipeline::new(cfg, embedder.clone(), generator, None).unwrap());

    let mut handles = Vec::new();
    for i in 0..4 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move {
            pipeline
                .ingest_document(&format!("copy{i}.md"), RUST_TEXT, None)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stats = pipeline.stats();
    assert_eq!(stats.documents, 4);
    // All four copies chunk identically, so unique content count equals
    // one document's fragment count.
    assert_eq!(stats.cache_computations as usize, stats.fragments / 4);
}

#[tokio::test]
async fn test_delete_removes_document_completely() {
    let (pipeline, _) = stub_pipeline(test_config());
    let doc = pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    pipeline
        .ingest_document("bread.md", COOKING_TEXT, None)
        .await
        .unwrap();

    assert!(pipeline.delete_document(&doc.id).await.unwrap());
    let stats = pipeline.stats();
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.index_entries, stats.fragments);

    // Deleted content can no longer be cited.
    let answer = pipeline
        .answer_question("What enforces ownership rules?", None, None)
        .await
        .unwrap();
    let docs = pipeline.stats().documents;
    assert_eq!(docs, 1);
    for id in &answer.cited_fragment_ids {
        assert!(!id.is_empty());
    }

    // Deleting again is a no-op.
    assert!(!pipeline.delete_document(&doc.id).await.unwrap());
}

#[tokio::test]
async fn test_ask_with_empty_corpus_returns_no_citations() {
    let (pipeline, _) = stub_pipeline(test_config());
    let answer = pipeline
        .answer_question("anything?", None, None)
        .await
        .unwrap();
    assert!(answer.cited_fragment_ids.is_empty());
}

#[tokio::test]
async fn test_tiny_budget_limits_cited_fragments() {
    let (pipeline, _) = stub_pipeline(test_config());
    pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();

    // A budget smaller than one fragment still produces exactly one
    // (truncated) citation.
    let answer = pipeline
        .answer_question("ownership?", None, Some(30))
        .await
        .unwrap();
    assert_eq!(answer.cited_fragment_ids.len(), 1);
}

#[tokio::test]
async fn test_summarize_unknown_document_errors() {
    let (pipeline, _) = stub_pipeline(test_config());
    let err = pipeline
        .summarize(&["no-such-id".to_string()], None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no-such-id"));
}

#[tokio::test]
async fn test_summarize_uses_document_order() {
    let (pipeline, _) = stub_pipeline(test_config());
    let doc = pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    let answer = pipeline
        .summarize(&[doc.id.clone()], Some(10_000))
        .await
        .unwrap();
    assert!(!answer.text.is_empty());
    assert_eq!(
        answer.cited_fragment_ids.len(),
        pipeline.stats().fragments
    );
}

#[tokio::test]
async fn test_whitespace_only_document_rejected_and_corpus_unchanged() {
    let (pipeline, _) = stub_pipeline(test_config());
    assert!(pipeline
        .ingest_document("empty.txt", "   \n\t  ", None)
        .await
        .is_err());
    let stats = pipeline.stats();
    assert_eq!(stats.documents, 0);
    assert_eq!(stats.index_entries, 0);
}

#[tokio::test]
async fn test_write_through_persists_without_explicit_flush() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.json");
    let mut cfg = test_config();
    cfg.persistence.mode = PersistMode::WriteThrough;

    let (pipeline, _) = persistent_pipeline(cfg, path.clone());
    pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    assert!(path.exists());
    assert!(!pipeline.is_dirty());
}

#[tokio::test]
async fn test_snapshot_round_trip_restores_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.json");

    let (pipeline, _) = persistent_pipeline(test_config(), path.clone());
    let doc = pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    assert!(pipeline.is_dirty());
    pipeline.flush().unwrap();
    let before = pipeline.stats();
    drop(pipeline);

    let (restored, _) = persistent_pipeline(test_config(), path);
    let after = restored.stats();
    assert_eq!(after.documents, before.documents);
    assert_eq!(after.fragments, before.fragments);
    assert_eq!(after.index_entries, before.index_entries);

    // Restored corpus is fully queryable.
    let answer = restored
        .answer_question("What enforces ownership rules?", None, None)
        .await
        .unwrap();
    assert!(!answer.cited_fragment_ids.is_empty());
    let summary = restored.summarize(&[doc.id], None).await.unwrap();
    assert!(!summary.text.is_empty());
}

#[tokio::test]
async fn test_restored_cache_skips_reembedding() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.json");

    let (pipeline, _) = persistent_pipeline(test_config(), path.clone());
    pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    pipeline.flush().unwrap();
    drop(pipeline);

    // The snapshot carries the embedding cache, so re-ingesting the
    // same content after a restart touches the embedder zero times.
    let (restored, embedder) = persistent_pipeline(test_config(), path);
    restored
        .ingest_document("rust-again.md", RUST_TEXT, None)
        .await
        .unwrap();
    assert_eq!(restored.cache().computations(), 0);
    assert_eq!(embedder.calls(), 0);
    assert!(restored.cache().hits() > 0);
}

#[tokio::test]
async fn test_snapshot_from_other_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.json");

    let (pipeline, _) = persistent_pipeline(test_config(), path.clone());
    pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    pipeline.flush().unwrap();
    drop(pipeline);

    let mut cfg = test_config();
    cfg.embedding.model = "different-embedder-v2".to_string();
    let embedder = Arc::new(StubEmbedder::new(&cfg.embedding.model, cfg.embedding.dims));
    let generator = Arc::new(StubGenerator::new(&cfg.generation.model));
    let err = Pipeline::new(cfg, embedder, generator, Some(SnapshotStore::new(path)))
        .err()
        .unwrap();
    assert!(err.to_string().contains("model"));
}

#[tokio::test]
async fn test_flush_without_store_is_noop() {
    let (pipeline, _) = stub_pipeline(test_config());
    pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    pipeline.flush().unwrap();
}

#[tokio::test]
async fn test_concurrent_ingest_and_query() {
    let (pipeline, _) = stub_pipeline(test_config());
    pipeline
        .ingest_document("rust.md", RUST_TEXT, None)
        .await
        .unwrap();
    let pipeline = Arc::new(pipeline);

    let writer = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            for i in 0..5 {
                pipeline
                    .ingest_document(&format!("extra{i}.md"), COOKING_TEXT, None)
                    .await
                    .unwrap();
            }
        })
    };
    let reader = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            for _ in 0..5 {
                let answer = pipeline
                    .answer_question("memory safety?", None, None)
                    .await
                    .unwrap();
                // The initial document is always queryable mid-ingest.
                assert!(!answer.text.is_empty());
            }
        })
    };
    writer.await.unwrap();
    reader.await.unwrap();

    assert_eq!(pipeline.stats().documents, 6);
}
