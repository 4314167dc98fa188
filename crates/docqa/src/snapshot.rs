//! JSON corpus snapshots.
//!
//! A snapshot captures the whole corpus state: document records, their
//! fragments, and the vector index contents. Writes go to a temp file
//! in the same directory followed by a rename, so a crash mid-write
//! leaves the previous snapshot intact.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use docqa_core::index::IndexSnapshot;
use docqa_core::models::{Document, Fragment};

/// Bumped when the on-disk layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub document: Document,
    pub fragments: Vec<Fragment>,
}

/// One completed embedding cache entry. Keys are already qualified by
/// model version, so a snapshot only ever seeds a cache whose model
/// passed the restore gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    pub version: u32,
    pub index: IndexSnapshot,
    pub documents: Vec<DocumentEntry>,
    #[serde(default)]
    pub cache: Vec<CacheEntry>,
}

/// Reads and writes corpus snapshots at a fixed path.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically persist a snapshot.
    pub fn save(&self, snapshot: &CorpusSnapshot) -> anyhow::Result<()> {
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("creating snapshot directory {}", parent.display()))?;

        let json = serde_json::to_vec_pretty(snapshot).context("serializing snapshot")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)
            .with_context(|| format!("writing snapshot temp file {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("publishing snapshot {}", self.path.display()))?;
        info!(
            path = %self.path.display(),
            documents = snapshot.documents.len(),
            entries = snapshot.index.entry_count,
            "snapshot saved"
        );
        Ok(())
    }

    /// Load the snapshot if one exists.
    pub fn load(&self) -> anyhow::Result<Option<CorpusSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("reading snapshot {}", self.path.display()))?;
        let snapshot: CorpusSnapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing snapshot {}", self.path.display()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            anyhow::bail!(
                "snapshot version {} is not supported (expected {})",
                snapshot.version,
                SNAPSHOT_VERSION
            );
        }
        Ok(Some(snapshot))
    }
}
