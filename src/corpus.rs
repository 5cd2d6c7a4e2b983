//! Persisted stage outputs.
//!
//! Each stage writes a pretty-printed JSON array under `[corpus].dir`:
//! `verses.json` after parsing, `chunks.json` after chunking, and
//! `chunks_with_context.json` after augmentation. The chunk files are the
//! seam between the offline pipeline and query time and round-trip
//! losslessly.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

use scripture_harness_core::models::{Chunk, Verse};

use crate::config::CorpusConfig;

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn save_verses(path: &Path, verses: &[Verse]) -> Result<()> {
    write_json(path, verses)
}

pub fn load_verses(path: &Path) -> Result<Vec<Verse>> {
    read_json(path)
}

pub fn save_chunks(path: &Path, chunks: &[Chunk]) -> Result<()> {
    write_json(path, chunks)
}

pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    read_json(path)
}

/// The chunk file queries should be served from: the augmented corpus if
/// it exists, otherwise the plain chunk file.
pub fn current_chunks_path(corpus: &CorpusConfig) -> Option<PathBuf> {
    [corpus.contextual_chunks_path(), corpus.chunks_path()]
        .into_iter()
        .find(|p| p.exists())
}

pub fn load_current_chunks(corpus: &CorpusConfig) -> Result<(PathBuf, Vec<Chunk>)> {
    let path = current_chunks_path(corpus).with_context(|| {
        format!(
            "No chunk corpus in {}. Run `sctx ingest` first.",
            corpus.dir.display()
        )
    })?;
    let chunks = load_chunks(&path)?;
    Ok((path, chunks))
}
