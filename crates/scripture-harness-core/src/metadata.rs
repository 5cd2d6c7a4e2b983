//! Positional chunk metadata.
//!
//! Attaches the span position of a chunk (book, start/end chapter and
//! verse, verse count, chunk kind). Retrieval treats the map as opaque and
//! only returns it to callers.

use serde_json::json;

use crate::chunk::ChunkKind;
use crate::models::{Chunk, Metadata};

/// Build the positional metadata for a chunk.
pub fn positional_metadata(chunk: &Chunk, kind: ChunkKind) -> Metadata {
    let mut meta = Metadata::new();
    if let (Some(first), Some(last)) = (chunk.verses.first(), chunk.verses.last()) {
        meta.insert("book".to_string(), json!(first.book));
        meta.insert("start_chapter".to_string(), json!(first.chapter));
        meta.insert("start_verse".to_string(), json!(first.verse));
        meta.insert("end_chapter".to_string(), json!(last.chapter));
        meta.insert("end_verse".to_string(), json!(last.verse));
    }
    meta.insert("verse_count".to_string(), json!(chunk.verses.len()));
    meta.insert("kind".to_string(), json!(kind.as_str()));
    meta
}

/// Return a copy of `chunk` carrying its positional metadata.
///
/// Existing keys are kept; positional keys are only added when missing so
/// enrichment applied by an upstream collaborator is never overwritten.
pub fn enrich(chunk: Chunk, kind: ChunkKind) -> Chunk {
    let positional = positional_metadata(&chunk, kind);
    let mut meta = chunk.metadata.clone().unwrap_or_default();
    for (key, value) in positional {
        meta.entry(key).or_insert(value);
    }
    Chunk {
        metadata: Some(meta),
        ..chunk
    }
}
