//! Core data models shared by the chunking, augmentation, and retrieval
//! pipeline.
//!
//! [`Verse`] records come from the verse store and are never modified.
//! [`Chunk`]s are created by the chunker, receive metadata once and
//! generated context once, and are then persisted as the corpus that the
//! hybrid index is built from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Opaque chunk metadata, ordered so serialized output is stable.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A single verse record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    pub book: String,
    pub chapter: u32,
    pub verse: u32,
    pub text: String,
    /// Words the translators supplied, written in `[brackets]` in the source.
    #[serde(default)]
    pub implied_words: Vec<String>,
    /// Display reference, e.g. `"Genesis 1:1"`.
    pub reference: String,
}

impl Verse {
    /// Build a verse and derive its display reference.
    pub fn new(
        book: impl Into<String>,
        chapter: u32,
        verse: u32,
        text: impl Into<String>,
        implied_words: Vec<String>,
    ) -> Self {
        let book = book.into();
        let reference = format!("{} {}:{}", book, chapter, verse);
        Self {
            book,
            chapter,
            verse,
            text: text.into(),
            implied_words,
            reference,
        }
    }

    /// Whether two verses belong to the same (book, chapter) group.
    pub fn same_chapter(&self, other: &Verse) -> bool {
        self.book == other.book && self.chapter == other.chapter
    }
}

/// A retrievable unit of one or more contiguous verses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier derived from [`Chunk::reference`].
    pub id: String,
    /// Display reference spanning the first and last verse.
    pub reference: String,
    /// Verse texts joined by single spaces.
    pub text: String,
    /// LLM-generated situating context. An empty string marks a failed
    /// generation; `None` means the augment stage never ran.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    pub verses: Vec<Verse>,
}

impl Chunk {
    /// Text fed to both the embedding model and the BM25 tokenizer.
    ///
    /// `context + "\n\n" + text` when a non-empty context is present,
    /// otherwise the bare chunk text.
    pub fn contextualized_text(&self) -> String {
        match self.context.as_deref() {
            Some(ctx) if !ctx.trim().is_empty() => format!("{}\n\n{}", ctx, self.text),
            _ => self.text.clone(),
        }
    }

    /// True when the augmenter produced a usable context.
    pub fn has_context(&self) -> bool {
        self.context
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn verse_count(&self) -> usize {
        self.verses.len()
    }
}

/// Which ranked list a [`RetrievalResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalSource {
    Vector,
    Bm25,
    Fused,
}

/// A single scored hit, produced per query and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub score: f64,
    pub source: RetrievalSource,
}

impl RetrievalResult {
    pub fn new(chunk_id: impl Into<String>, score: f64, source: RetrievalSource) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            score,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with_context(context: Option<&str>) -> Chunk {
        Chunk {
            id: "genesis_1_1".to_string(),
            reference: "Genesis 1:1".to_string(),
            text: "In the beginning God created the heaven and the earth.".to_string(),
            context: context.map(str::to_string),
            metadata: None,
            verses: vec![Verse::new(
                "Genesis",
                1,
                1,
                "In the beginning God created the heaven and the earth.",
                Vec::new(),
            )],
        }
    }

    #[test]
    fn test_verse_reference() {
        let v = Verse::new("1 Kings", 3, 16, "Then came there two women", Vec::new());
        assert_eq!(v.reference, "1 Kings 3:16");
    }

    #[test]
    fn test_contextualized_text_prefixes_context() {
        let c = chunk_with_context(Some("Opening of Genesis."));
        assert_eq!(
            c.contextualized_text(),
            "Opening of Genesis.\n\nIn the beginning God created the heaven and the earth."
        );
        assert!(c.has_context());
    }

    #[test]
    fn test_contextualized_text_without_context() {
        assert_eq!(
            chunk_with_context(None).contextualized_text(),
            chunk_with_context(None).text
        );
        let failed = chunk_with_context(Some(""));
        assert_eq!(failed.contextualized_text(), failed.text);
        assert!(!failed.has_context());
    }

    #[test]
    fn test_retrieval_source_serializes_lowercase() {
        let json = serde_json::to_string(&RetrievalSource::Bm25).unwrap();
        assert_eq!(json, "\"bm25\"");
    }
}
