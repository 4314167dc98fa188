use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use docqa_core::chunker::ChunkerConfig;
use docqa_core::index::SimilarityMetric;
use docqa_core::retriever::RetrieverConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            context: ContextConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            cache: CacheConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_boundary_lookahead")]
    pub boundary_lookahead: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            boundary_lookahead: default_boundary_lookahead(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}
fn default_boundary_lookahead() -> usize {
    80
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: i64,
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,
    #[serde(default = "default_diversity_cap")]
    pub diversity_cap: usize,
    #[serde(default)]
    pub error_on_empty: bool,
    #[serde(default = "default_metric")]
    pub metric: SimilarityMetric,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            overfetch_factor: default_overfetch_factor(),
            diversity_cap: default_diversity_cap(),
            error_on_empty: false,
            metric: default_metric(),
        }
    }
}

fn default_k() -> i64 {
    8
}
fn default_overfetch_factor() -> usize {
    4
}
fn default_diversity_cap() -> usize {
    2
}
fn default_metric() -> SimilarityMetric {
    SimilarityMetric::Cosine
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Context window budget in characters.
    #[serde(default = "default_budget")]
    pub budget: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
        }
    }
}

fn default_budget() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"stub"` or `"openai"`.
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base")]
    pub api_base: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model: default_embed_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            api_base: default_openai_base(),
        }
    }
}

fn default_embed_provider() -> String {
    "stub".to_string()
}
fn default_embed_model() -> String {
    "stub-embedder-v1".to_string()
}
fn default_dims() -> usize {
    64
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `"stub"` or `"openai"`.
    #[serde(default = "default_gen_provider")]
    pub provider: String,
    #[serde(default = "default_gen_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_gen_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base")]
    pub api_base: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_gen_provider(),
            model: default_gen_model(),
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_gen_timeout_secs(),
            api_base: default_openai_base(),
        }
    }
}

fn default_gen_provider() -> String {
    "stub".to_string()
}
fn default_gen_model() -> String {
    "stub-generator-v1".to_string()
}
fn default_gen_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Maximum cached embeddings before LRU eviction.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    100_000
}

/// Whether an acknowledged mutation implies durability.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PersistMode {
    /// Every acknowledged ingest/delete rewrites the snapshot before
    /// returning.
    WriteThrough,
    /// Mutations are acknowledged in memory; durability requires an
    /// explicit `flush`.
    WriteBack,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    /// Snapshot file path; empty disables persistence.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_persist_mode")]
    pub mode: PersistMode,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: None,
            mode: default_persist_mode(),
        }
    }
}

fn default_persist_mode() -> PersistMode {
    PersistMode::WriteBack
}

impl Config {
    pub fn chunker_config(&self) -> docqa_core::Result<ChunkerConfig> {
        ChunkerConfig::new(
            self.chunking.chunk_size,
            self.chunking.overlap,
            self.chunking.boundary_lookahead,
        )
    }

    pub fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            overfetch_factor: self.retrieval.overfetch_factor,
            diversity_cap: self.retrieval.diversity_cap,
            error_on_empty: self.retrieval.error_on_empty,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate(self)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be < chunking.chunk_size");
    }

    // Retrieval
    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.overfetch_factor == 0 {
        anyhow::bail!("retrieval.overfetch_factor must be > 0");
    }
    if config.retrieval.diversity_cap == 0 {
        anyhow::bail!("retrieval.diversity_cap must be > 0");
    }

    // Context
    if config.context.budget == 0 {
        anyhow::bail!("context.budget must be > 0");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "stub" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be stub or openai.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Generation
    match config.generation.provider.as_str() {
        "stub" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be stub or openai.",
            other
        ),
    }

    // Cache
    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be > 0");
    }

    Ok(())
}
