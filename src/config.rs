//! TOML configuration.
//!
//! Every section except `[corpus]` is optional and falls back to the
//! defaults below. The loaded [`Config`] is passed explicitly to each
//! component; nothing reads configuration from process-wide state.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use scripture_harness_core::chunk::{policy_by_name, ChunkerConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub parse: ParseConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl Config {
    /// Defaults everywhere, corpus under `dir`, no network providers.
    pub fn minimal(dir: impl Into<PathBuf>) -> Self {
        Self {
            corpus: CorpusConfig { dir: dir.into() },
            parse: ParseConfig::default(),
            chunking: ChunkingConfig::default(),
            context: ContextConfig {
                provider: "disabled".to_string(),
                ..ContextConfig::default()
            },
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.to_chunker_config().validate()?;
        policy_by_name(&self.chunking.boundary)?;

        if self.context.batch_size == 0 {
            bail!("context.batch_size must be >= 1");
        }
        if self.context.timeout_secs == 0 {
            bail!("context.timeout_secs must be > 0");
        }
        match self.context.provider.as_str() {
            "disabled" | "ollama" | "openai" => {}
            other => bail!(
                "Unknown context provider: '{}'. Must be disabled, ollama, or openai.",
                other
            ),
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be >= 1");
        }
        if self.embedding.timeout_secs == 0 {
            bail!("embedding.timeout_secs must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "hash" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, ollama, openai, or local.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }

        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.overfetch == 0 {
            bail!("retrieval.overfetch must be >= 1");
        }
        if !(self.retrieval.rrf_k.is_finite() && self.retrieval.rrf_k >= 0.0) {
            bail!("retrieval.rrf_k must be a non-negative number");
        }
        if self.retrieval.timeout_ms == 0 {
            bail!("retrieval.timeout_ms must be > 0");
        }
        Ok(())
    }
}

/// Where the persisted stage outputs live.
#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    pub dir: PathBuf,
}

impl CorpusConfig {
    pub fn verses_path(&self) -> PathBuf {
        self.dir.join("verses.json")
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.dir.join("chunks.json")
    }

    pub fn contextual_chunks_path(&self) -> PathBuf {
        self.dir.join("chunks_with_context.json")
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join("vectors.json")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParseConfig {
    #[serde(default = "default_skip_lines")]
    pub skip_lines: usize,
    /// Abort the whole load on the first malformed line.
    #[serde(default)]
    pub strict: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            skip_lines: default_skip_lines(),
            strict: false,
        }
    }
}

fn default_skip_lines() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_overlap_fraction")]
    pub overlap_fraction: f64,
    #[serde(default = "default_max_passage_size")]
    pub max_passage_size: usize,
    #[serde(default = "default_boundary")]
    pub boundary: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            overlap_fraction: default_overlap_fraction(),
            max_passage_size: default_max_passage_size(),
            boundary: default_boundary(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            window_size: self.window_size,
            overlap_fraction: self.overlap_fraction,
            max_passage_size: self.max_passage_size,
        }
    }
}

fn default_window_size() -> usize {
    7
}
fn default_overlap_fraction() -> f64 {
    0.5
}
fn default_max_passage_size() -> usize {
    15
}
fn default_boundary() -> String {
    "chapter".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_context_provider")]
    pub provider: String,
    #[serde(default = "default_context_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_context_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_context_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_context_timeout_secs")]
    pub timeout_secs: u64,
    /// Pause between batches.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            provider: default_context_provider(),
            model: default_context_model(),
            url: None,
            batch_size: default_context_batch_size(),
            max_retries: default_context_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_context_timeout_secs(),
            batch_delay_ms: default_batch_delay_ms(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl ContextConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_context_provider() -> String {
    "ollama".to_string()
}
fn default_context_model() -> String {
    "qwen3-14b-custom".to_string()
}
fn default_context_batch_size() -> usize {
    5
}
fn default_context_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_context_timeout_secs() -> u64 {
    120
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_max_tokens() -> u32 {
    150
}
fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_embedding_batch_size(),
            max_retries: default_embedding_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_embedding_batch_size() -> usize {
    64
}
fn default_embedding_max_retries() -> u32 {
    5
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Candidates per sub-index as a multiple of `top_k`.
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    /// Per-sub-query deadline.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Fuse a single list when the other sub-query times out.
    #[serde(default)]
    pub allow_partial: bool,
    #[serde(default = "default_stopwords")]
    pub stopwords: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rrf_k: default_rrf_k(),
            overfetch: default_overfetch(),
            timeout_ms: default_timeout_ms(),
            allow_partial: false,
            stopwords: default_stopwords(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_overfetch() -> usize {
    2
}
fn default_timeout_ms() -> u64 {
    5000
}
fn default_stopwords() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
