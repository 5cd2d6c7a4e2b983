//! Reciprocal rank fusion.
//!
//! Merges the vector and BM25 ranked lists on rank alone: a chunk at
//! 1-based position `r` in a list contributes `1 / (rrf_k + r)`, and its
//! fused score is the sum over the lists it appears in. Raw similarity and
//! BM25 magnitudes never enter the computation.
//!
//! Ordering is total: fused score descending, then the better vector rank
//! (a chunk missing from the vector list ranks after every chunk present
//! in it), then chunk ID ascending.
//!
//! # Example
//!
//! ```rust
//! use scripture_harness_core::fusion::{fuse, DEFAULT_RRF_K};
//! use scripture_harness_core::models::{RetrievalResult, RetrievalSource};
//!
//! let vector = vec![RetrievalResult::new("a", 0.9, RetrievalSource::Vector)];
//! let bm25 = vec![RetrievalResult::new("b", 4.2, RetrievalSource::Bm25)];
//! let fused = fuse(&vector, &bm25, 10, DEFAULT_RRF_K);
//! assert_eq!(fused[0].chunk_id, "a");
//! assert_eq!(fused[1].chunk_id, "b");
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::Serialize;

use crate::models::{RetrievalResult, RetrievalSource};

/// Conventional RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One fused entry with the per-list ranks it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedHit {
    pub chunk_id: String,
    pub score: f64,
    /// 1-based rank in the vector list, if present.
    pub vector_rank: Option<usize>,
    /// 1-based rank in the BM25 list, if present.
    pub bm25_rank: Option<usize>,
}

impl FusedHit {
    pub fn to_result(&self) -> RetrievalResult {
        RetrievalResult::new(self.chunk_id.clone(), self.score, RetrievalSource::Fused)
    }
}

/// Fuse two ranked lists and keep the best `top_k`.
///
/// Only list order is used. If an ID appears more than once in a list,
/// its best position counts.
///
/// `rrf_k` must be a finite, non-negative number. Negative values are
/// clamped to `0.0` and non-finite ones fall back to [`DEFAULT_RRF_K`],
/// so every contribution stays positive and finite.
pub fn fuse(
    vector_ranked: &[RetrievalResult],
    bm25_ranked: &[RetrievalResult],
    top_k: usize,
    rrf_k: f64,
) -> Vec<FusedHit> {
    let rrf_k = if rrf_k.is_finite() {
        rrf_k.max(0.0)
    } else {
        DEFAULT_RRF_K
    };
    let mut hits: HashMap<&str, FusedHit> = HashMap::new();

    for (pos, result) in vector_ranked.iter().enumerate() {
        let entry = hits
            .entry(result.chunk_id.as_str())
            .or_insert_with(|| empty_hit(&result.chunk_id));
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(pos + 1);
            entry.score += 1.0 / (rrf_k + (pos + 1) as f64);
        }
    }
    for (pos, result) in bm25_ranked.iter().enumerate() {
        let entry = hits
            .entry(result.chunk_id.as_str())
            .or_insert_with(|| empty_hit(&result.chunk_id));
        if entry.bm25_rank.is_none() {
            entry.bm25_rank = Some(pos + 1);
            entry.score += 1.0 / (rrf_k + (pos + 1) as f64);
        }
    }

    let mut fused: Vec<FusedHit> = hits.into_values().collect();
    fused.sort_by(fused_order);
    fused.truncate(top_k);
    fused
}

/// Same as [`fuse`], projected to plain [`RetrievalResult`]s.
pub fn fuse_results(
    vector_ranked: &[RetrievalResult],
    bm25_ranked: &[RetrievalResult],
    top_k: usize,
    rrf_k: f64,
) -> Vec<RetrievalResult> {
    fuse(vector_ranked, bm25_ranked, top_k, rrf_k)
        .iter()
        .map(FusedHit::to_result)
        .collect()
}

fn empty_hit(chunk_id: &str) -> FusedHit {
    FusedHit {
        chunk_id: chunk_id.to_string(),
        score: 0.0,
        vector_rank: None,
        bm25_rank: None,
    }
}

fn fused_order(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| {
            let ra = a.vector_rank.unwrap_or(usize::MAX);
            let rb = b.vector_rank.unwrap_or(usize::MAX);
            ra.cmp(&rb)
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
