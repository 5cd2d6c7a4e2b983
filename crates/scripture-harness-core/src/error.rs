//! Error types for the core crate.

use std::time::Duration;

use thiserror::Error;

/// Which half of a hybrid query a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubQuery {
    Vector,
    Bm25,
}

impl std::fmt::Display for SubQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubQuery::Vector => f.write_str("vector"),
            SubQuery::Bm25 => f.write_str("bm25"),
        }
    }
}

/// A source line that does not have the shape of a verse record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: not a verse record: {content:?}")]
pub struct ParseError {
    /// 1-based line number in the source file.
    pub line: usize,
    pub content: String,
}

/// A chunk whose context generation exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("context generation failed for {chunk_id} after {attempts} attempt(s): {reason}")]
pub struct AugmentationFailure {
    pub chunk_id: String,
    pub attempts: u32,
    pub reason: String,
}

/// Errors raised by chunking, indexing, and querying.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid chunker configuration, detected before any work starts.
    #[error("invalid chunking configuration: {0}")]
    ChunkConfig(String),

    #[error(transparent)]
    Augmentation(#[from] AugmentationFailure),

    /// Vector and lexical sides were built from different chunk sets.
    #[error("index sides built from different corpora (vector {vector}, lexical {lexical})")]
    IndexConsistency { vector: String, lexical: String },

    #[error("embedding dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("{sub_query} sub-query timed out after {after:?}")]
    QueryTimeout { sub_query: SubQuery, after: Duration },
}

/// A convenience result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
