//! Hybrid (vector + BM25) index over a chunk corpus.
//!
//! Both sub-indices are built in one call from the same chunk slice and
//! stamped with a corpus fingerprint. An index is never patched: when the
//! chunk set changes, build a new one and swap it in.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::models::{Chunk, Metadata, RetrievalResult};
use crate::tokenize::Tokenizer;
use crate::vector::VectorIndex;

/// Candidates fetched per sub-index, as a multiple of `top_k`.
pub const DEFAULT_OVERFETCH: usize = 2;

/// Fingerprint of a chunk set: SHA-256 over the sorted
/// `(chunk id, SHA-256 of contextualized text)` pairs.
///
/// Independent of chunk order; changes whenever any chunk's ID, text, or
/// context changes.
pub fn corpus_fingerprint(chunks: &[Chunk]) -> String {
    let mut entries: Vec<(&str, String)> = chunks
        .iter()
        .map(|c| {
            let mut h = Sha256::new();
            h.update(c.contextualized_text().as_bytes());
            (c.id.as_str(), format!("{:x}", h.finalize()))
        })
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (id, digest) in entries {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// The two independently ranked candidate lists for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedLists {
    pub vector: Vec<RetrievalResult>,
    pub bm25: Vec<RetrievalResult>,
}

/// A read-only hybrid index plus the capabilities it was built with.
pub struct HybridIndex {
    fingerprint: String,
    vector: VectorIndex,
    lexical: LexicalIndex,
    metadata: HashMap<String, Option<Metadata>>,
    embedder: Arc<dyn EmbeddingProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    overfetch: usize,
}

impl HybridIndex {
    /// Embed and tokenize every chunk's contextualized text.
    pub async fn build(
        chunks: &[Chunk],
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        embed_batch_size: usize,
    ) -> Result<Self> {
        let vector = VectorIndex::build(chunks, embedder.as_ref(), embed_batch_size).await?;
        let lexical = LexicalIndex::build(chunks, tokenizer.as_ref(), Bm25Params::default());
        Self::from_parts(chunks, vector, lexical, embedder, tokenizer)
    }

    /// Assemble an index from separately built or loaded sub-indices.
    ///
    /// Fails with [`Error::IndexConsistency`] unless both sides carry the
    /// fingerprint of `chunks`.
    pub fn from_parts(
        chunks: &[Chunk],
        vector: VectorIndex,
        lexical: LexicalIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> Result<Self> {
        if vector.fingerprint() != lexical.fingerprint() {
            return Err(Error::IndexConsistency {
                vector: vector.fingerprint().to_string(),
                lexical: lexical.fingerprint().to_string(),
            });
        }
        let fingerprint = corpus_fingerprint(chunks);
        if fingerprint != vector.fingerprint() {
            return Err(Error::IndexConsistency {
                vector: vector.fingerprint().to_string(),
                lexical: fingerprint,
            });
        }
        if !vector.is_empty() && embedder.dims() != vector.dims() {
            return Err(Error::DimensionMismatch {
                expected: vector.dims(),
                actual: embedder.dims(),
            });
        }

        let metadata = chunks
            .iter()
            .map(|c| (c.id.clone(), c.metadata.clone()))
            .collect();

        Ok(Self {
            fingerprint,
            vector,
            lexical,
            metadata,
            embedder,
            tokenizer,
            overfetch: DEFAULT_OVERFETCH,
        })
    }

    pub fn with_overfetch(mut self, overfetch: usize) -> Self {
        self.overfetch = overfetch.max(1);
        self
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.lexical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lexical.is_empty()
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.vector
    }

    pub fn lexical_index(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Metadata stored for a chunk at build time.
    pub fn metadata(&self, chunk_id: &str) -> Option<&Metadata> {
        self.metadata.get(chunk_id).and_then(Option::as_ref)
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.metadata.contains_key(chunk_id)
    }

    /// Candidates retrieved from each sub-index for a given `top_k`.
    pub fn candidate_limit(&self, top_k: usize) -> usize {
        top_k.saturating_mul(self.overfetch)
    }

    /// Embed raw query text. Queries are never contextualized.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(Error::Embedding(format!(
                "expected 1 query vector, got {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }

    /// Vector candidates for an already embedded query.
    pub fn vector_candidates(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        self.vector.search(query, self.candidate_limit(top_k))
    }

    /// BM25 candidates for raw query text.
    pub fn lexical_candidates(&self, text: &str, top_k: usize) -> Vec<RetrievalResult> {
        let tokens = self.tokenizer.tokens(text);
        self.lexical.search(&tokens, self.candidate_limit(top_k))
    }

    /// Run both sub-queries and return their ranked lists.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<RankedLists> {
        let query_vec = self.embed_query(text).await?;
        Ok(RankedLists {
            vector: self.vector_candidates(&query_vec, top_k)?,
            bm25: self.lexical_candidates(text, top_k),
        })
    }
}
