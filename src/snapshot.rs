//! Vector snapshot persistence and index loading.
//!
//! Embedding the corpus is the expensive half of an index build, so the
//! vector side is persisted to `vectors.json` together with the corpus
//! fingerprint and embedding model it was built with. The BM25 side is
//! cheap and is rebuilt from the chunk file on every load; both sides must
//! then agree on the fingerprint or the load fails.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use scripture_harness_core::embedding::{blob_to_vec, vec_to_blob, EmbeddingProvider};
use scripture_harness_core::index::HybridIndex;
use scripture_harness_core::lexical::{Bm25Params, LexicalIndex};
use scripture_harness_core::models::Chunk;
use scripture_harness_core::tokenize::{Tokenizer, WordTokenizer};
use scripture_harness_core::vector::VectorIndex;

use crate::config::Config;
use crate::corpus::{load_current_chunks, read_json, write_json};
use crate::embedding::create_provider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSnapshot {
    pub fingerprint: String,
    pub model: String,
    pub dims: usize,
    pub built_at: DateTime<Utc>,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub chunk_id: String,
    /// Base64 of little-endian f32 bytes.
    pub vector: String,
}

impl VectorSnapshot {
    pub fn from_index(index: &VectorIndex, model: &str) -> Self {
        Self {
            fingerprint: index.fingerprint().to_string(),
            model: model.to_string(),
            dims: index.dims(),
            built_at: Utc::now(),
            entries: index
                .entries()
                .map(|(id, v)| SnapshotEntry {
                    chunk_id: id.to_string(),
                    vector: STANDARD.encode(vec_to_blob(v)),
                })
                .collect(),
        }
    }

    pub fn to_index(&self) -> Result<VectorIndex> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let blob = STANDARD
                .decode(&entry.vector)
                .with_context(|| format!("Corrupt vector for chunk {}", entry.chunk_id))?;
            entries.push((entry.chunk_id.clone(), blob_to_vec(&blob)));
        }
        let index = VectorIndex::from_parts(self.fingerprint.clone(), entries)?;
        if !index.is_empty() && index.dims() != self.dims {
            bail!(
                "Snapshot declares {} dims but stores {}-dim vectors",
                self.dims,
                index.dims()
            );
        }
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn load(path: &Path) -> Result<Self> {
        read_json(path)
    }
}

pub fn tokenizer_for(config: &Config) -> Arc<dyn Tokenizer> {
    Arc::new(WordTokenizer::new(config.retrieval.stopwords))
}

/// Build the hybrid index for `chunks` from scratch.
pub async fn build_index(
    config: &Config,
    chunks: &[Chunk],
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<HybridIndex> {
    let index = HybridIndex::build(
        chunks,
        embedder,
        tokenizer_for(config),
        config.embedding.batch_size,
    )
    .await?;
    Ok(index.with_overfetch(config.retrieval.overfetch))
}

/// Reassemble the index for `chunks` from a persisted vector snapshot.
pub fn load_index(
    config: &Config,
    chunks: &[Chunk],
    snapshot: &VectorSnapshot,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<HybridIndex> {
    if snapshot.model != embedder.model_name() {
        bail!(
            "Vector snapshot was built with model '{}' but '{}' is configured. Run `sctx index`.",
            snapshot.model,
            embedder.model_name()
        );
    }
    let tokenizer = tokenizer_for(config);
    let vector = snapshot.to_index()?;
    let lexical = LexicalIndex::build(chunks, tokenizer.as_ref(), Bm25Params::default());
    let index = HybridIndex::from_parts(chunks, vector, lexical, embedder, tokenizer)
        .context("Vector snapshot does not match the chunk corpus. Run `sctx index`.")?;
    Ok(index.with_overfetch(config.retrieval.overfetch))
}

/// Run the index command: embed the current corpus and persist the snapshot.
pub async fn run_index(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Indexing requires embeddings. Set [embedding] provider in config.");
    }
    let (path, chunks) = load_current_chunks(&config.corpus)?;
    let embedder = create_provider(&config.embedding)?;
    let index = build_index(config, &chunks, Arc::clone(&embedder)).await?;

    let snapshot = VectorSnapshot::from_index(index.vector_index(), embedder.model_name());
    snapshot.save(&config.corpus.vectors_path())?;
    info!(chunks = index.len(), fingerprint = %index.fingerprint(), "index written");

    println!("index");
    println!("  corpus: {}", path.display());
    println!("  chunks indexed: {}", index.len());
    println!("  model: {} ({} dims)", snapshot.model, snapshot.dims);
    println!("  fingerprint: {}", &snapshot.fingerprint[..12]);
    println!("ok");
    Ok(())
}
