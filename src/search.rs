//! Query engine: concurrent hybrid retrieval with per-sub-query deadlines.
//!
//! A query runs the vector and BM25 sub-queries concurrently against a
//! shared `Arc<HybridIndex>`, each under its own deadline, and fuses the
//! two ranked lists with reciprocal rank fusion. A timed-out sub-query is
//! an error unless the caller asked for partial results, in which case
//! the surviving list is fused alone and the response says so.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use scripture_harness_core::error::{Error, SubQuery};
use scripture_harness_core::fusion::{fuse, FusedHit};
use scripture_harness_core::index::HybridIndex;
use scripture_harness_core::models::{Chunk, Metadata, RetrievalResult};

use crate::config::{Config, RetrievalConfig};
use crate::corpus::load_current_chunks;
use crate::embedding::create_provider;
use crate::snapshot::{build_index, load_index, VectorSnapshot};

/// Per-query knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    pub top_k: usize,
    pub rrf_k: f64,
    /// Deadline applied to each sub-query independently.
    pub timeout: Duration,
    pub allow_partial: bool,
}

impl From<&RetrievalConfig> for QueryOptions {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            rrf_k: config.rrf_k,
            timeout: Duration::from_millis(config.timeout_ms),
            allow_partial: config.allow_partial,
        }
    }
}

/// Where a hit ranked in each sub-query list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HitExplanation {
    pub vector_rank: Option<usize>,
    pub bm25_rank: Option<usize>,
}

/// A fused result joined back to its chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryHit {
    pub chunk_id: String,
    pub reference: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub explain: HitExplanation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub hits: Vec<QueryHit>,
    /// True when one sub-query timed out and only the other was fused.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_sub_query")]
    pub timed_out: Option<SubQuery>,
}

fn serialize_sub_query<S: serde::Serializer>(
    value: &Option<SubQuery>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(q) => serializer.collect_str(q),
        None => serializer.serialize_none(),
    }
}

impl QueryResponse {
    fn empty() -> Self {
        Self {
            hits: Vec::new(),
            partial: false,
            timed_out: None,
        }
    }
}

/// Read-only query front end over one index generation.
#[derive(Clone)]
pub struct QueryEngine {
    index: Arc<HybridIndex>,
    chunks: Arc<HashMap<String, Chunk>>,
}

impl QueryEngine {
    pub fn new(index: Arc<HybridIndex>, chunks: Vec<Chunk>) -> Self {
        let chunks = chunks.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            index,
            chunks: Arc::new(chunks),
        }
    }

    pub fn index(&self) -> &Arc<HybridIndex> {
        &self.index
    }

    pub async fn query(&self, text: &str, options: &QueryOptions) -> Result<QueryResponse> {
        if text.trim().is_empty() || options.top_k == 0 || self.index.is_empty() {
            return Ok(QueryResponse::empty());
        }

        let vector = with_deadline(
            SubQuery::Vector,
            options.timeout,
            vector_sub_query(Arc::clone(&self.index), text.to_string(), options.top_k),
        );
        let bm25 = with_deadline(
            SubQuery::Bm25,
            options.timeout,
            bm25_sub_query(Arc::clone(&self.index), text.to_string(), options.top_k),
        );

        let (vector_list, bm25_list, timed_out) = if options.allow_partial {
            let (v, b) = tokio::join!(vector, bm25);
            match (v, b) {
                (Ok(v), Ok(b)) => (v, b, None),
                (Err(e), Ok(b)) => match timed_out_sub_query(&e) {
                    Some(q) => (Vec::new(), b, Some(q)),
                    None => return Err(e),
                },
                (Ok(v), Err(e)) => match timed_out_sub_query(&e) {
                    Some(q) => (v, Vec::new(), Some(q)),
                    None => return Err(e),
                },
                (Err(e), Err(_)) => return Err(e),
            }
        } else {
            let (v, b) = tokio::try_join!(vector, bm25)?;
            (v, b, None)
        };

        if let Some(q) = timed_out {
            warn!(sub_query = %q, after_ms = options.timeout.as_millis() as u64, "returning partial results");
        }
        debug!(
            vector = vector_list.len(),
            bm25 = bm25_list.len(),
            "fusing candidate lists"
        );

        let fused = fuse(&vector_list, &bm25_list, options.top_k, options.rrf_k);
        Ok(QueryResponse {
            hits: fused.iter().filter_map(|h| self.to_hit(h)).collect(),
            partial: timed_out.is_some(),
            timed_out,
        })
    }

    fn to_hit(&self, hit: &FusedHit) -> Option<QueryHit> {
        let Some(chunk) = self.chunks.get(&hit.chunk_id) else {
            warn!(chunk_id = %hit.chunk_id, "fused hit has no chunk record");
            return None;
        };
        Some(QueryHit {
            chunk_id: chunk.id.clone(),
            reference: chunk.reference.clone(),
            text: chunk.text.clone(),
            context: chunk.context.clone(),
            score: hit.score,
            metadata: self.index.metadata(&chunk.id).cloned(),
            explain: HitExplanation {
                vector_rank: hit.vector_rank,
                bm25_rank: hit.bm25_rank,
            },
        })
    }
}

async fn vector_sub_query(
    index: Arc<HybridIndex>,
    text: String,
    top_k: usize,
) -> Result<Vec<RetrievalResult>> {
    let query_vec = index.embed_query(&text).await?;
    let ranked = tokio::task::spawn_blocking(move || index.vector_candidates(&query_vec, top_k))
        .await
        .map_err(|e| anyhow!("vector sub-query task failed: {}", e))??;
    Ok(ranked)
}

async fn bm25_sub_query(
    index: Arc<HybridIndex>,
    text: String,
    top_k: usize,
) -> Result<Vec<RetrievalResult>> {
    tokio::task::spawn_blocking(move || index.lexical_candidates(&text, top_k))
        .await
        .map_err(|e| anyhow!("bm25 sub-query task failed: {}", e))
}

async fn with_deadline<T>(
    sub_query: SubQuery,
    after: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::QueryTimeout { sub_query, after }.into()),
    }
}

/// The sub-query an error reports as timed out, if it is a timeout.
pub fn timed_out_sub_query(err: &anyhow::Error) -> Option<SubQuery> {
    match err.downcast_ref::<Error>() {
        Some(Error::QueryTimeout { sub_query, .. }) => Some(*sub_query),
        _ => None,
    }
}

/// Load the current corpus and its index, building the index in memory
/// when no vector snapshot exists yet.
pub async fn open_engine(config: &Config) -> Result<QueryEngine> {
    let (_, chunks) = load_current_chunks(&config.corpus)?;
    let embedder = create_provider(&config.embedding)?;
    let vectors_path = config.corpus.vectors_path();
    let index = if vectors_path.exists() {
        let snapshot = VectorSnapshot::load(&vectors_path)?;
        load_index(config, &chunks, &snapshot, embedder)?
    } else {
        warn!("no vector snapshot; embedding corpus in memory (run `sctx index` to persist)");
        build_index(config, &chunks, embedder).await?
    };
    Ok(QueryEngine::new(Arc::new(index), chunks))
}

/// Options for `sctx query` on top of the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub top_k: Option<usize>,
    pub explain: bool,
    pub allow_partial: bool,
    pub json: bool,
}

pub async fn run_query(config: &Config, text: &str, args: &QueryArgs) -> Result<()> {
    if text.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let mut options = QueryOptions::from(&config.retrieval);
    if let Some(k) = args.top_k {
        options.top_k = k;
    }
    options.allow_partial |= args.allow_partial;

    let engine = open_engine(config).await?;
    let response = engine.query(text, &options).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if let Some(q) = response.timed_out {
        eprintln!("Warning: {} sub-query timed out; results are partial.", q);
    }
    if response.hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in response.hits.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, hit.score, hit.reference);
        if let Some(context) = hit.context.as_deref().filter(|c| !c.trim().is_empty()) {
            println!("    context: \"{}\"", context.replace('\n', " ").trim());
        }
        println!("    text: \"{}\"", hit.text.replace('\n', " ").trim());
        if args.explain {
            println!(
                "    ranks: vector {} / bm25 {}",
                format_rank(hit.explain.vector_rank),
                format_rank(hit.explain.bm25_rank)
            );
        }
        println!("    id: {}", hit.chunk_id);
        println!();
    }
    Ok(())
}

fn format_rank(rank: Option<usize>) -> String {
    rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use async_trait::async_trait;
    use scripture_harness_core::chunk::chunk_verses;
    use scripture_harness_core::embedding::EmbeddingProvider;
    use scripture_harness_core::models::Verse;
    use scripture_harness_core::tokenize::{Tokenizer, WordTokenizer};

    /// Hash embedder that sleeps before answering queries (single-text calls).
    struct SlowQueryEmbedder {
        inner: HashEmbedder,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowQueryEmbedder {
        fn model_name(&self) -> &str {
            "slow-hash"
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(
            &self,
            texts: &[String],
        ) -> scripture_harness_core::Result<Vec<Vec<f32>>> {
            if texts.len() == 1 {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.embed(texts).await
        }
    }

    /// Word tokenizer that stalls on texts containing `marker`. Chunk
    /// texts never contain it, so only queries are slowed down.
    struct StallingTokenizer {
        marker: &'static str,
        delay: Duration,
    }

    impl Tokenizer for StallingTokenizer {
        fn tokens(&self, text: &str) -> Vec<String> {
            if text.contains(self.marker) {
                std::thread::sleep(self.delay);
            }
            WordTokenizer::default().tokens(text)
        }
    }

    fn stalling_tokenizer() -> Arc<dyn Tokenizer> {
        Arc::new(StallingTokenizer {
            marker: "tarry",
            delay: Duration::from_millis(300),
        })
    }

    fn slow_embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(SlowQueryEmbedder {
            inner: HashEmbedder::new(64),
            delay: Duration::from_millis(500),
        })
    }

    fn corpus() -> Vec<Chunk> {
        let mut verses = Vec::new();
        for (ch, theme) in [(1, "light darkness"), (2, "garden river"), (3, "serpent fruit")] {
            for v in 1..=5 {
                verses.push(Verse::new(
                    "Genesis",
                    ch,
                    v,
                    format!("{} verse {} of chapter {}", theme, v, ch),
                    Vec::new(),
                ));
            }
        }
        chunk_verses(&verses, 7, 0.5, 15).unwrap()
    }

    async fn engine_with(embedder: Arc<dyn EmbeddingProvider>) -> QueryEngine {
        engine_with_tokenizer(embedder, Arc::new(WordTokenizer::default())).await
    }

    async fn engine_with_tokenizer(
        embedder: Arc<dyn EmbeddingProvider>,
        tokenizer: Arc<dyn Tokenizer>,
    ) -> QueryEngine {
        let chunks = corpus();
        let index = HybridIndex::build(&chunks, embedder, tokenizer, 8)
            .await
            .unwrap();
        QueryEngine::new(Arc::new(index), chunks)
    }

    fn options() -> QueryOptions {
        QueryOptions {
            top_k: 3,
            rrf_k: 60.0,
            timeout: Duration::from_secs(5),
            allow_partial: false,
        }
    }

    #[tokio::test]
    async fn test_query_returns_joined_hits() {
        let engine = engine_with(Arc::new(HashEmbedder::new(64))).await;
        let response = engine.query("serpent fruit", &options()).await.unwrap();
        assert!(!response.partial);
        assert_eq!(response.hits[0].reference, "Genesis 3:1-5");
        assert_eq!(response.hits[0].explain.bm25_rank, Some(1));
        assert!(response.hits[0].metadata.is_none());
        assert!(response.hits.len() <= 3);
    }

    #[tokio::test]
    async fn test_empty_query_has_no_hits() {
        let engine = engine_with(Arc::new(HashEmbedder::new(64))).await;
        let response = engine.query("   ", &options()).await.unwrap();
        assert!(response.hits.is_empty());
    }

    #[tokio::test]
    async fn test_stopword_only_query_has_no_hits() {
        let engine = engine_with(Arc::new(HashEmbedder::new(64))).await;
        let response = engine.query("the and", &options()).await.unwrap();
        assert!(response.hits.is_empty());
        assert!(!response.partial);
    }

    #[tokio::test]
    async fn test_vector_timeout_is_an_error_by_default() {
        let engine = engine_with(slow_embedder()).await;
        let mut opts = options();
        opts.timeout = Duration::from_millis(20);
        let err = engine.query("garden", &opts).await.err().unwrap();
        assert_eq!(timed_out_sub_query(&err), Some(SubQuery::Vector));
    }

    #[tokio::test]
    async fn test_vector_timeout_with_partial_fuses_bm25_alone() {
        let engine = engine_with(slow_embedder()).await;
        let mut opts = options();
        opts.timeout = Duration::from_millis(20);
        opts.allow_partial = true;
        let response = engine.query("garden river", &opts).await.unwrap();
        assert!(response.partial);
        assert_eq!(response.timed_out, Some(SubQuery::Vector));
        assert_eq!(response.hits.len(), 1);
        assert_eq!(response.hits[0].reference, "Genesis 2:1-5");
        assert_eq!(response.hits[0].explain.vector_rank, None);
    }

    #[tokio::test]
    async fn test_bm25_timeout_is_an_error_by_default() {
        let engine =
            engine_with_tokenizer(Arc::new(HashEmbedder::new(64)), stalling_tokenizer()).await;
        let mut opts = options();
        opts.timeout = Duration::from_millis(50);
        let err = engine.query("tarry by the river", &opts).await.err().unwrap();
        assert_eq!(timed_out_sub_query(&err), Some(SubQuery::Bm25));
    }

    #[tokio::test]
    async fn test_bm25_timeout_with_partial_fuses_vector_alone() {
        let engine =
            engine_with_tokenizer(Arc::new(HashEmbedder::new(64)), stalling_tokenizer()).await;
        let mut opts = options();
        opts.timeout = Duration::from_millis(50);
        opts.allow_partial = true;
        let response = engine.query("tarry in the garden river", &opts).await.unwrap();
        assert!(response.partial);
        assert_eq!(response.timed_out, Some(SubQuery::Bm25));
        assert!(!response.hits.is_empty());
        assert!(response.hits.iter().all(|h| h.explain.bm25_rank.is_none()));
        assert!(response.hits.iter().all(|h| h.explain.vector_rank.is_some()));
    }

    #[tokio::test]
    async fn test_both_timeouts_fail_even_with_partial() {
        let engine = engine_with_tokenizer(slow_embedder(), stalling_tokenizer()).await;
        let mut opts = options();
        opts.timeout = Duration::from_millis(50);
        opts.allow_partial = true;
        let err = engine.query("tarry in the garden", &opts).await.err().unwrap();
        assert!(timed_out_sub_query(&err).is_some());
    }

    #[test]
    fn test_partial_response_serializes_sub_query_name() {
        let response = QueryResponse {
            hits: Vec::new(),
            partial: true,
            timed_out: Some(SubQuery::Bm25),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["timed_out"], "bm25");
        assert_eq!(json["partial"], true);
    }
}
