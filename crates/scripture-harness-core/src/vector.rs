//! Brute-force cosine-similarity vector index.
//!
//! Stores one embedding per chunk, keyed by chunk ID. Search scans every
//! stored vector, which is fast enough for a corpus of a few tens of
//! thousands of chunks.

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::corpus_fingerprint;
use crate::models::{Chunk, RetrievalResult, RetrievalSource};

/// In-memory vector sub-index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    fingerprint: String,
    dims: usize,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Embed the contextualized text of every chunk and index the vectors.
    pub async fn build(
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(Chunk::contextualized_text).collect();
            let embedded = embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            vectors.extend(embedded);
        }
        Self::from_embeddings(chunks, vectors)
    }

    /// Index precomputed vectors, one per chunk in the same order.
    pub fn from_embeddings(chunks: &[Chunk], vectors: Vec<Vec<f32>>) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(Error::Embedding(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let entries = chunks
            .iter()
            .map(|c| c.id.clone())
            .zip(vectors)
            .collect();
        Self::from_parts(corpus_fingerprint(chunks), entries)
    }

    /// Reassemble an index from a persisted fingerprint and entries.
    pub fn from_parts(fingerprint: String, entries: Vec<(String, Vec<f32>)>) -> Result<Self> {
        let dims = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut ids = Vec::with_capacity(entries.len());
        let mut vectors = Vec::with_capacity(entries.len());
        for (id, vector) in entries {
            if vector.len() != dims {
                return Err(Error::DimensionMismatch {
                    expected: dims,
                    actual: vector.len(),
                });
            }
            ids.push(id);
            vectors.push(vector);
        }
        Ok(Self {
            fingerprint,
            dims,
            ids,
            vectors,
        })
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate over `(chunk_id, vector)` pairs in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.vectors.iter().map(Vec::as_slice))
    }

    /// Return the `limit` most similar chunks, best first.
    ///
    /// Ties are broken by chunk ID so results are deterministic. A zero
    /// query vector has no direction and matches nothing.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<RetrievalResult>> {
        if self.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }
        if query.iter().all(|x| *x == 0.0) {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v) as f64))
            .collect();
        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                RetrievalResult::new(self.ids[i].clone(), score, RetrievalSource::Vector)
            })
            .collect())
    }
}
