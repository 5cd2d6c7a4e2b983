//! Corpus statistics and health overview.
//!
//! A quick summary of what the pipeline has produced so far: verse and
//! chunk counts, passage vs window chunks, context coverage, and whether
//! the persisted vector snapshot still matches the corpus. Used by
//! `sctx stats` to check that an ingest or index run did what it should.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;

use scripture_harness_core::chunk::ChunkKind;
use scripture_harness_core::index::corpus_fingerprint;
use scripture_harness_core::models::Chunk;

use crate::config::Config;
use crate::corpus::{current_chunks_path, load_chunks, load_verses};
use crate::progress::format_number;
use crate::snapshot::VectorSnapshot;

/// Counts derived from one chunk file.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub total: usize,
    pub passages: usize,
    pub windows: usize,
    pub with_context: usize,
    pub books: usize,
}

impl ChunkStats {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut stats = ChunkStats {
            total: chunks.len(),
            ..Default::default()
        };
        let mut books = std::collections::BTreeSet::new();
        for chunk in chunks {
            match kind_of(chunk) {
                Some(ChunkKind::Passage) => stats.passages += 1,
                Some(ChunkKind::Window) => stats.windows += 1,
                None => {}
            }
            if chunk.has_context() {
                stats.with_context += 1;
            }
            if let Some(first) = chunk.verses.first() {
                books.insert(first.book.as_str());
            }
        }
        stats.books = books.len();
        stats
    }
}

fn kind_of(chunk: &Chunk) -> Option<ChunkKind> {
    let kind = chunk.metadata.as_ref()?.get("kind")?.as_str()?;
    [ChunkKind::Passage, ChunkKind::Window]
        .into_iter()
        .find(|k| k.as_str() == kind)
}

/// Run the stats command: read the corpus files and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let corpus = &config.corpus;

    println!("Scripture Harness Corpus Stats");
    println!("==============================");
    println!();
    println!("  Corpus:      {}", corpus.dir.display());

    let verses_path = corpus.verses_path();
    if verses_path.exists() {
        let verses = load_verses(&verses_path)?;
        println!(
            "  Verses:      {}  ({})",
            format_number(verses.len() as u64),
            format_bytes(file_size(&verses_path))
        );
    } else {
        println!("  Verses:      none (run `sctx ingest`)");
    }

    let Some(chunks_path) = current_chunks_path(corpus) else {
        println!("  Chunks:      none");
        println!();
        return Ok(());
    };
    let chunks = load_chunks(&chunks_path)?;
    let stats = ChunkStats::from_chunks(&chunks);

    println!(
        "  Chunks:      {}  ({})",
        format_number(stats.total as u64),
        chunks_path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    println!("  Books:       {}", stats.books);
    println!("  Passages:    {}", format_number(stats.passages as u64));
    println!("  Windows:     {}", format_number(stats.windows as u64));
    println!(
        "  Context:     {} / {} ({}%)",
        format_number(stats.with_context as u64),
        format_number(stats.total as u64),
        percent(stats.with_context, stats.total)
    );

    println!();
    let vectors_path = corpus.vectors_path();
    if !vectors_path.exists() {
        println!("  Snapshot:    none (run `sctx index`)");
    } else {
        let snapshot = VectorSnapshot::load(&vectors_path)?;
        let status = if snapshot.fingerprint == corpus_fingerprint(&chunks) {
            "current"
        } else {
            "stale (run `sctx index`)"
        };
        println!("  Snapshot:    {}", status);
        println!("  Model:       {} ({} dims)", snapshot.model, snapshot.dims);
        println!(
            "  Vectors:     {}  ({})",
            format_number(snapshot.entries.len() as u64),
            format_bytes(file_size(&vectors_path))
        );
        println!("  Built:       {}", format_relative(snapshot.built_at));
    }
    println!();
    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn percent(part: usize, total: usize) -> usize {
    if total > 0 {
        part * 100 / total
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp as a relative time string (e.g. "3 hours ago").
fn format_relative(at: DateTime<Utc>) -> String {
    let delta = (Utc::now() - at).num_seconds();
    if delta < 0 {
        return at.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}
