//! KJV verse-line reader.
//!
//! The source is a plain-text file with a short header followed by one
//! verse per line:
//!
//! ```text
//! Genesis 1:1 In the beginning God created the heaven and the earth.
//! Song of Solomon 2:1 I [am] the rose of Sharon, [and] the lily of the valleys.
//! ```
//!
//! Words the translators supplied are written in `[brackets]`; they stay
//! in the verse text and are also collected into `implied_words`.
//!
//! A line that does not match becomes a [`ParseError`] for that line only.
//! Whether one bad line aborts the load is the caller's choice
//! (`parse.strict`).

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use tracing::{debug, warn};

use scripture_harness_core::error::{Error, ParseError};
use scripture_harness_core::models::Verse;

use crate::config::ParseConfig;

const VERSE_PATTERN: &str =
    r"^([1-3]?\s*[A-Za-z]+(?:\s+[oO]f\s+[A-Za-z]+)?)\s+(\d+):(\d+)\s*(.+)$";
const IMPLIED_PATTERN: &str = r"\[([^\]]+)\]";

/// Verses read from a source plus the lines that could not be parsed.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub verses: Vec<Verse>,
    pub errors: Vec<ParseError>,
}

pub struct VerseReader {
    verse: Regex,
    implied: Regex,
    skip_lines: usize,
}

impl VerseReader {
    pub fn new(skip_lines: usize) -> Result<Self> {
        Ok(Self {
            verse: Regex::new(VERSE_PATTERN)?,
            implied: Regex::new(IMPLIED_PATTERN)?,
            skip_lines,
        })
    }

    /// Parse one trimmed, non-empty line.
    pub fn parse_line(&self, line: &str) -> Option<Verse> {
        let caps = self.verse.captures(line)?;
        let book = caps.get(1)?.as_str().trim();
        let chapter: u32 = caps.get(2)?.as_str().parse().ok()?;
        let verse: u32 = caps.get(3)?.as_str().parse().ok()?;
        let text = caps.get(4)?.as_str().trim();

        let implied_words = self
            .implied
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
            .collect();

        Some(Verse::new(book, chapter, verse, text, implied_words))
    }

    /// Parse a whole document. Header lines and blank lines are skipped;
    /// error line numbers are 1-based positions in `content`.
    pub fn parse_str(&self, content: &str) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();
        for (idx, raw) in content.lines().enumerate().skip(self.skip_lines) {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            match self.parse_line(line) {
                Some(verse) => outcome.verses.push(verse),
                None => {
                    warn!(line = idx + 1, content = %line, "skipping malformed verse line");
                    outcome.errors.push(ParseError {
                        line: idx + 1,
                        content: line.to_string(),
                    });
                }
            }
        }
        debug!(
            verses = outcome.verses.len(),
            errors = outcome.errors.len(),
            "parsed verse source"
        );
        outcome
    }
}

/// Read and parse a verse file according to `config`.
///
/// In strict mode the first malformed line fails the whole load.
pub fn read_verse_file(path: &Path, config: &ParseConfig) -> Result<ParseOutcome> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read verse source: {}", path.display()))?;
    let outcome = VerseReader::new(config.skip_lines)?.parse_str(&content);

    if config.strict {
        if let Some(first) = outcome.errors.first() {
            return Err(Error::Parse(first.clone()))
                .with_context(|| format!("Strict parse of {} failed", path.display()));
        }
    }
    Ok(outcome)
}
