//! CLI command implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::warn;

use docqa_core::error::CoreError;

use crate::pipeline::Pipeline;

const SUPPORTED_EXTENSIONS: [&str; 2] = ["txt", "md"];

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand the given paths into a flat list of readable document files.
/// Directories contribute their top-level supported files only.
fn collect_files(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(path)
                .with_context(|| format!("reading directory {}", path.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_supported(p))
                .collect();
            entries.sort();
            if entries.is_empty() {
                warn!(path = %path.display(), "directory contains no supported files");
            }
            files.extend(entries);
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            anyhow::bail!("no such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

fn read_document(path: &Path) -> anyhow::Result<String> {
    let name = path.display().to_string();
    if !is_supported(path) {
        return Err(CoreError::DocumentParse {
            name,
            reason: "unsupported file type (expected .txt or .md)".into(),
        }
        .into());
    }
    let bytes = fs::read(path).with_context(|| format!("reading {name}"))?;
    String::from_utf8(bytes).map_err(|e| {
        CoreError::DocumentParse {
            name,
            reason: format!("not valid UTF-8: {e}"),
        }
        .into()
    })
}

pub async fn run_ingest(pipeline: &Pipeline, paths: &[PathBuf]) -> anyhow::Result<()> {
    let files = collect_files(paths)?;
    if files.is_empty() {
        anyhow::bail!("nothing to ingest");
    }
    // A bad file skips, not aborts: earlier successes stay ingested
    // and still reach the exit flush.
    let mut failures = 0usize;
    for file in &files {
        let text = match read_document(file) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Skipping {}: {e}", file.display());
                failures += 1;
                continue;
            }
        };
        let source_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        match pipeline.ingest_document(&source_name, &text, None).await {
            Ok(document) => println!("Ingested {} as {}", source_name, document.id),
            Err(e) => {
                eprintln!("Skipping {}: {e}", file.display());
                failures += 1;
            }
        }
    }
    if failures == files.len() {
        anyhow::bail!("all {failures} files failed to ingest");
    }
    if failures > 0 {
        println!("Skipped {failures} of {} files", files.len());
    }
    let stats = pipeline.stats();
    println!(
        "Corpus: {} documents, {} fragments, {} index entries",
        stats.documents, stats.fragments, stats.index_entries
    );
    Ok(())
}

pub async fn run_ask(
    pipeline: &Pipeline,
    question: &str,
    k: Option<i64>,
    budget: Option<usize>,
) -> anyhow::Result<()> {
    let answer = pipeline.answer_question(question, k, budget).await?;
    println!("{}", answer.text);
    if !answer.cited_fragment_ids.is_empty() {
        println!();
        println!("Sources ({} fragments):", answer.cited_fragment_ids.len());
        for id in &answer.cited_fragment_ids {
            println!("  {id}");
        }
    }
    Ok(())
}

pub async fn run_summarize(
    pipeline: &Pipeline,
    ids: &[String],
    budget: Option<usize>,
) -> anyhow::Result<()> {
    let answer = pipeline.summarize(ids, budget).await?;
    println!("{}", answer.text);
    Ok(())
}

pub async fn run_delete(pipeline: &Pipeline, id: &str) -> anyhow::Result<()> {
    if pipeline.delete_document(id).await? {
        println!("Deleted document {id}");
    } else {
        println!("No document with id {id}");
    }
    Ok(())
}

pub fn run_stats(pipeline: &Pipeline) -> anyhow::Result<()> {
    let stats = pipeline.stats();
    println!("Documents:          {}", stats.documents);
    println!("Fragments:          {}", stats.fragments);
    println!("Index entries:      {}", stats.index_entries);
    println!(
        "Index dimension:    {}",
        stats
            .index_dimension
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Cache entries:      {}", stats.cache_entries);
    println!("Cache hits:         {}", stats.cache_hits);
    println!("Cache computations: {}", stats.cache_computations);
    Ok(())
}

pub fn run_flush(pipeline: &Pipeline) -> anyhow::Result<()> {
    pipeline.flush()?;
    match pipeline.config().persistence.path.as_ref() {
        Some(path) => println!("Snapshot written to {}", path.display()),
        None => println!("No persistence path configured; nothing to flush."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::providers::{StubEmbedder, StubGenerator};

    fn stub_pipeline() -> Pipeline {
        let cfg = Config::default();
        let embedder = Arc::new(StubEmbedder::new(&cfg.embedding.model, cfg.embedding.dims));
        let generator = Arc::new(StubGenerator::new(&cfg.generation.model));
        Pipeline::new(cfg, embedder, generator, None).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_skips_bad_files_and_keeps_good_ones() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("good.txt"), "A perfectly fine document.").unwrap();
        fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, 0x41]).unwrap();
        fs::write(dir.path().join("empty.md"), "   \n").unwrap();

        let pipeline = stub_pipeline();
        run_ingest(&pipeline, &[dir.path().to_path_buf()])
            .await
            .unwrap();
        assert_eq!(pipeline.stats().documents, 1);
    }

    #[tokio::test]
    async fn test_ingest_fails_when_every_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.txt"), [0xff, 0xfe, 0x41]).unwrap();

        let pipeline = stub_pipeline();
        assert!(run_ingest(&pipeline, &[dir.path().to_path_buf()])
            .await
            .is_err());
    }

    #[test]
    fn test_collect_files_from_directory_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.md", "c.rs", "notes"] {
            fs::File::create(dir.path().join(name))
                .unwrap()
                .write_all(b"x")
                .unwrap();
        }
        let files = collect_files(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.md", "b.txt"]);
    }

    #[test]
    fn test_read_document_rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"abc").unwrap();
        let err = read_document(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported file type"));
    }

    #[test]
    fn test_read_document_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        fs::write(&path, [0xff, 0xfe, 0x41]).unwrap();
        let err = read_document(&path).unwrap_err();
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[test]
    fn test_collect_files_missing_path_errors() {
        assert!(collect_files(&[PathBuf::from("/definitely/not/here.txt")]).is_err());
    }
}
