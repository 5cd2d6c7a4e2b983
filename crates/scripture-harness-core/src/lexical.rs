//! Okapi BM25 lexical index.
//!
//! An inverted index from token to `(document, term frequency)` postings.
//! Corpus statistics (document frequencies, average length) are global,
//! so the index is built once over the whole chunk set and never patched.
//!
//! ```text
//! score(d, q) = Σ idf(t) · tf·(k1 + 1) / (tf + k1·(1 − b + b·|d|/avgdl))
//! idf(t)      = ln(1 + (N − df + 0.5) / (df + 0.5))
//! ```

use std::collections::HashMap;

use crate::index::corpus_fingerprint;
use crate::models::{Chunk, RetrievalResult, RetrievalSource};
use crate::tokenize::Tokenizer;

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Length normalization (0 = none, 1 = full).
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

/// In-memory BM25 sub-index.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    fingerprint: String,
    params: Bm25Params,
    ids: Vec<String>,
    doc_lens: Vec<usize>,
    avg_len: f64,
    postings: HashMap<String, Vec<(usize, u32)>>,
}

impl LexicalIndex {
    /// Tokenize the contextualized text of every chunk and index it.
    pub fn build(chunks: &[Chunk], tokenizer: &dyn Tokenizer, params: Bm25Params) -> Self {
        let docs = chunks
            .iter()
            .map(|c| (c.id.clone(), tokenizer.tokens(&c.contextualized_text())))
            .collect();
        Self::from_tokens(corpus_fingerprint(chunks), docs, params)
    }

    /// Index pre-tokenized documents.
    pub fn from_tokens(
        fingerprint: String,
        docs: Vec<(String, Vec<String>)>,
        params: Bm25Params,
    ) -> Self {
        let mut ids = Vec::with_capacity(docs.len());
        let mut doc_lens = Vec::with_capacity(docs.len());
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();

        for (doc_idx, (id, tokens)) in docs.into_iter().enumerate() {
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for (token, count) in tf {
                postings.entry(token).or_default().push((doc_idx, count));
            }
            ids.push(id);
            doc_lens.push(tokens.len());
        }

        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f64 / doc_lens.len() as f64
        };

        Self {
            fingerprint,
            params,
            ids,
            doc_lens,
            avg_len,
            postings,
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of documents containing `token`.
    pub fn document_frequency(&self, token: &str) -> usize {
        self.postings.get(token).map(Vec::len).unwrap_or(0)
    }

    /// Inverse document frequency; never negative.
    pub fn idf(&self, doc_frequency: usize) -> f64 {
        if doc_frequency == 0 {
            return 0.0;
        }
        let n = self.ids.len() as f64;
        let df = doc_frequency as f64;
        (1.0 + ((n - df + 0.5) / (df + 0.5)).max(0.0)).ln()
    }

    /// Score every document matching at least one query token and return
    /// the best `limit`, ties broken by chunk ID.
    ///
    /// Repeated query tokens contribute once per occurrence.
    pub fn search(&self, query_tokens: &[String], limit: usize) -> Vec<RetrievalResult> {
        if self.is_empty() || limit == 0 || self.avg_len <= 0.0 {
            return Vec::new();
        }

        let Bm25Params { k1, b } = self.params;
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for token in query_tokens {
            let Some(list) = self.postings.get(token) else {
                continue;
            };
            let idf = self.idf(list.len());
            for &(doc, tf) in list {
                let tf = tf as f64;
                let norm = 1.0 - b + b * (self.doc_lens[doc] as f64 / self.avg_len);
                *scores.entry(doc).or_insert(0.0) += idf * (tf * (k1 + 1.0)) / (tf + k1 * norm);
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });
        ranked.truncate(limit);

        ranked
            .into_iter()
            .map(|(doc, score)| {
                RetrievalResult::new(self.ids[doc].clone(), score, RetrievalSource::Bm25)
            })
            .collect()
    }
}
