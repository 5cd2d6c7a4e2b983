//! Hybrid passage / sliding-window verse chunker.
//!
//! Converts an ordered verse sequence into [`Chunk`]s in two phases:
//!
//! 1. **Passages.** Verses are partitioned into maximal runs sharing the
//!    same (book, chapter). A [`BoundaryPolicy`] may split a run further;
//!    a new book or chapter always starts a new run.
//! 2. **Windows.** A passage longer than `max_passage_size` is replaced by
//!    windows of `window_size` verses advancing by
//!    `max(1, ceil(window_size × (1 − overlap_fraction)))`. The window that
//!    reaches the end of the passage is clipped to the tail and is the last
//!    one, so every verse is covered.
//!
//! Chunk IDs derive from the span reference, so re-chunking the same input
//! with the same configuration reproduces the same chunks.
//!
//! # Example
//!
//! ```rust
//! use scripture_harness_core::chunk::chunk_verses;
//! use scripture_harness_core::models::Verse;
//!
//! let verses: Vec<Verse> = (1..=3)
//!     .map(|n| Verse::new("Genesis", 1, n, format!("verse {}", n), Vec::new()))
//!     .collect();
//! let chunks = chunk_verses(&verses, 7, 0.5, 15).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].id, "genesis_1_1_3");
//! ```

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Chunk, Verse};

/// Chunker tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Verses per sliding window.
    pub window_size: usize,
    /// Fraction of a window shared with the next one, in `[0, 1)`.
    pub overlap_fraction: f64,
    /// Longest passage kept whole.
    pub max_passage_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window_size: 7,
            overlap_fraction: 0.5,
            max_passage_size: 15,
        }
    }
}

impl ChunkerConfig {
    /// Reject configurations that could not produce a terminating chunking.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::ChunkConfig("window_size must be >= 1".to_string()));
        }
        if self.max_passage_size == 0 {
            return Err(Error::ChunkConfig(
                "max_passage_size must be >= 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.overlap_fraction) {
            return Err(Error::ChunkConfig(format!(
                "overlap_fraction must be in [0, 1), got {}",
                self.overlap_fraction
            )));
        }
        Ok(())
    }

    /// Window advance for this configuration.
    pub fn step(&self) -> usize {
        window_step(self.window_size, self.overlap_fraction)
    }
}

/// Compute the sliding-window step: `max(1, ceil(window_size × (1 − overlap)))`.
///
/// A tiny epsilon absorbs float noise so that e.g. `10 × (1 − 0.3)` is
/// treated as 7, not 8.
pub fn window_step(window_size: usize, overlap_fraction: f64) -> usize {
    let raw = window_size as f64 * (1.0 - overlap_fraction);
    if !raw.is_finite() || raw <= 0.0 {
        return 1;
    }
    ((raw - 1e-9).ceil() as usize).max(1)
}

/// Whether a chunk is a whole passage or a window cut from a long one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Passage,
    Window,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Passage => "passage",
            ChunkKind::Window => "window",
        }
    }
}

/// Decides where, inside one chapter, a passage should end.
///
/// Book and chapter changes are always boundaries and are not consulted
/// here. `previous` and `next` are adjacent verses of the same chapter.
pub trait BoundaryPolicy: Send + Sync {
    fn name(&self) -> &str;
    fn is_boundary(&self, previous: &Verse, next: &Verse) -> bool;
}

/// Passages are whole chapters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapterBoundary;

impl BoundaryPolicy for ChapterBoundary {
    fn name(&self) -> &str {
        "chapter"
    }

    fn is_boundary(&self, _previous: &Verse, _next: &Verse) -> bool {
        false
    }
}

/// Splits a chapter before verses that open with a narrative marker.
#[derive(Debug, Clone)]
pub struct NarrativeBoundary {
    phrases: Vec<String>,
}

/// Opening phrases that commonly start a new scene in the KJV.
pub const NARRATIVE_MARKERS: &[&str] = &[
    "And it came to pass",
    "Now it came to pass",
    "After these things",
    "Then",
    "Behold",
    "Verily, verily",
    "Thus saith the Lord",
];

impl NarrativeBoundary {
    pub fn new(phrases: Vec<String>) -> Self {
        Self { phrases }
    }
}

impl Default for NarrativeBoundary {
    fn default() -> Self {
        Self::new(NARRATIVE_MARKERS.iter().map(|p| p.to_string()).collect())
    }
}

impl BoundaryPolicy for NarrativeBoundary {
    fn name(&self) -> &str {
        "narrative"
    }

    fn is_boundary(&self, _previous: &Verse, next: &Verse) -> bool {
        let text = next.text.trim_start();
        self.phrases.iter().any(|phrase| {
            text.strip_prefix(phrase.as_str())
                .map(|rest| !rest.starts_with(char::is_alphanumeric))
                .unwrap_or(false)
        })
    }
}

/// Resolve a policy from its configured name.
pub fn policy_by_name(name: &str) -> Result<Box<dyn BoundaryPolicy>> {
    match name {
        "chapter" => Ok(Box::new(ChapterBoundary)),
        "narrative" => Ok(Box::new(NarrativeBoundary::default())),
        other => Err(Error::ChunkConfig(format!(
            "unknown boundary policy '{}': use chapter or narrative",
            other
        ))),
    }
}

/// One planned chunk: its kind and the verses it covers.
#[derive(Debug, Clone)]
pub struct ChunkSpan<'a> {
    pub kind: ChunkKind,
    pub verses: Vec<&'a Verse>,
}

impl ChunkSpan<'_> {
    pub fn to_chunk(&self) -> Chunk {
        make_chunk(&self.verses)
    }
}

/// Hybrid chunker bound to a validated configuration and boundary policy.
pub struct Chunker {
    config: ChunkerConfig,
    policy: Box<dyn BoundaryPolicy>,
}

impl Chunker {
    /// Create a chunker with the chapter-only boundary policy.
    ///
    /// Fails with [`Error::ChunkConfig`] before any chunking happens if the
    /// configuration is invalid.
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            policy: Box::new(ChapterBoundary),
        })
    }

    pub fn with_policy(mut self, policy: Box<dyn BoundaryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Partition verses into passages, preserving input order.
    ///
    /// Within a passage, verses are ordered by verse number.
    pub fn passages<'a>(&self, verses: &'a [Verse]) -> Vec<Vec<&'a Verse>> {
        let mut passages: Vec<Vec<&'a Verse>> = Vec::new();
        let mut current: Vec<&'a Verse> = Vec::new();

        for verse in verses {
            if let Some(prev) = current.last() {
                if !prev.same_chapter(verse) || self.policy.is_boundary(prev, verse) {
                    passages.push(std::mem::take(&mut current));
                }
            }
            current.push(verse);
        }
        if !current.is_empty() {
            passages.push(current);
        }

        for passage in &mut passages {
            passage.sort_by_key(|v| v.verse);
        }
        passages
    }

    /// Plan every chunk: whole passages, or windows over long passages.
    pub fn spans<'a>(&self, verses: &'a [Verse]) -> Vec<ChunkSpan<'a>> {
        let step = self.config.step();
        let mut spans = Vec::new();

        for passage in self.passages(verses) {
            if passage.len() <= self.config.max_passage_size {
                spans.push(ChunkSpan {
                    kind: ChunkKind::Passage,
                    verses: passage,
                });
                continue;
            }
            for range in window_ranges(passage.len(), self.config.window_size, step) {
                spans.push(ChunkSpan {
                    kind: ChunkKind::Window,
                    verses: passage[range].to_vec(),
                });
            }
        }
        spans
    }

    /// Chunk a verse sequence. Empty input yields no chunks.
    pub fn chunk(&self, verses: &[Verse]) -> Vec<Chunk> {
        self.spans(verses).iter().map(ChunkSpan::to_chunk).collect()
    }
}

/// Chunk verses with the default chapter boundary policy.
pub fn chunk_verses(
    verses: &[Verse],
    window_size: usize,
    overlap_fraction: f64,
    max_passage_size: usize,
) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(ChunkerConfig {
        window_size,
        overlap_fraction,
        max_passage_size,
    })?;
    Ok(chunker.chunk(verses))
}

/// Window ranges over `len` items; the last range ends exactly at `len`.
fn window_ranges(len: usize, window_size: usize, step: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    if len == 0 {
        return ranges;
    }
    let mut start = 0;
    loop {
        let end = (start + window_size).min(len);
        ranges.push(start..end);
        if end == len {
            break;
        }
        start += step.max(1);
    }
    ranges
}

/// Display reference for a run of verses.
pub fn span_reference(first: &Verse, last: &Verse) -> String {
    if first.book != last.book {
        return format!("{}-{}", first.reference, last.reference);
    }
    if first.chapter != last.chapter {
        return format!(
            "{} {}:{}-{}:{}",
            first.book, first.chapter, first.verse, last.chapter, last.verse
        );
    }
    if first.verse == last.verse {
        return first.reference.clone();
    }
    format!(
        "{} {}:{}-{}",
        first.book, first.chapter, first.verse, last.verse
    )
}

/// Derive a chunk ID: lowercase, every non-alphanumeric replaced by `_`.
pub fn chunk_id(reference: &str) -> String {
    reference
        .chars()
        .flat_map(|c| {
            let mapped: Vec<char> = if c.is_alphanumeric() {
                c.to_lowercase().collect()
            } else {
                vec!['_']
            };
            mapped
        })
        .collect()
}

fn make_chunk(verses: &[&Verse]) -> Chunk {
    let (first, last) = match (verses.first(), verses.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => {
            return Chunk {
                id: String::new(),
                reference: String::new(),
                text: String::new(),
                context: None,
                metadata: None,
                verses: Vec::new(),
            }
        }
    };
    let reference = span_reference(first, last);
    let text = verses
        .iter()
        .map(|v| v.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");

    Chunk {
        id: chunk_id(&reference),
        reference,
        text,
        context: None,
        metadata: None,
        verses: verses.iter().map(|v| (*v).clone()).collect(),
    }
}
