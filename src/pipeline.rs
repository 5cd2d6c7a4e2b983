//! Offline ingest pipeline.
//!
//! The pipeline is an ordered list of [`Stage`]s over a shared
//! [`PipelineState`]:
//!
//! ```text
//! parse ──▶ chunk ──▶ [augment] ──▶ persist ──▶ [index]
//! ```
//!
//! Skipping context generation means the augment stage is simply not in
//! the list; no stage checks a flag to decide whether to do its work.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use scripture_harness_core::chunk::{policy_by_name, ChunkKind, Chunker};
use scripture_harness_core::embedding::EmbeddingProvider;
use scripture_harness_core::error::ParseError;
use scripture_harness_core::index::HybridIndex;
use scripture_harness_core::metadata;
use scripture_harness_core::models::{Chunk, Verse};

use crate::augment::{AugmentConfig, AugmentReport, ContextAugmenter};
use crate::config::{Config, CorpusConfig, ParseConfig};
use crate::corpus::{load_chunks, save_chunks, save_verses};
use crate::embedding::create_provider;
use crate::llm::{create_generator, ContextGenerator};
use crate::progress::{AugmentProgressReporter, ProgressMode};
use crate::snapshot::{build_index, VectorSnapshot};
use crate::verses::read_verse_file;

/// Everything produced so far by a pipeline run.
#[derive(Default)]
pub struct PipelineState {
    pub verses: Vec<Verse>,
    pub parse_errors: Vec<ParseError>,
    pub chunks: Vec<Chunk>,
    /// Set once the augment stage has run.
    pub augment: Option<AugmentReport>,
    pub index: Option<HybridIndex>,
    pub written: Vec<PathBuf>,
}

impl PipelineState {
    pub fn passage_count(&self) -> usize {
        self.count_kind(ChunkKind::Passage)
    }

    pub fn window_count(&self) -> usize {
        self.count_kind(ChunkKind::Window)
    }

    fn count_kind(&self, kind: ChunkKind) -> usize {
        self.chunks
            .iter()
            .filter(|c| {
                c.metadata
                    .as_ref()
                    .and_then(|m| m.get("kind"))
                    .and_then(|k| k.as_str())
                    == Some(kind.as_str())
            })
            .count()
    }
}

/// One step of the offline pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, state: &mut PipelineState) -> Result<()>;
}

/// Read verses from the KJV source file.
pub struct ParseStage {
    pub input: PathBuf,
    pub config: ParseConfig,
    /// Keep only the first N verses.
    pub sample_size: Option<usize>,
}

#[async_trait]
impl Stage for ParseStage {
    fn name(&self) -> &'static str {
        "parse"
    }

    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let outcome = read_verse_file(&self.input, &self.config)?;
        let mut verses = outcome.verses;
        if let Some(n) = self.sample_size {
            verses.truncate(n);
        }
        state.verses = verses;
        state.parse_errors = outcome.errors;
        Ok(())
    }
}

/// Chunk verses and attach positional metadata.
pub struct ChunkStage {
    pub chunker: Chunker,
}

impl ChunkStage {
    pub fn from_config(config: &Config) -> Result<Self> {
        let chunker = Chunker::new(config.chunking.to_chunker_config())?
            .with_policy(policy_by_name(&config.chunking.boundary)?);
        Ok(Self { chunker })
    }
}

#[async_trait]
impl Stage for ChunkStage {
    fn name(&self) -> &'static str {
        "chunk"
    }

    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        state.chunks = self
            .chunker
            .spans(&state.verses)
            .iter()
            .map(|span| metadata::enrich(span.to_chunk(), span.kind))
            .collect();
        Ok(())
    }
}

/// Generate situating context for every chunk.
pub struct AugmentStage {
    pub augmenter: ContextAugmenter,
    pub progress: Box<dyn AugmentProgressReporter>,
}

#[async_trait]
impl Stage for AugmentStage {
    fn name(&self) -> &'static str {
        "augment"
    }

    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let (chunks, report) = self
            .augmenter
            .augment(&state.chunks, self.progress.as_ref())
            .await;
        state.chunks = chunks;
        state.augment = Some(report);
        Ok(())
    }
}

/// Write stage outputs under the corpus directory.
///
/// `chunks.json` always holds the chunks without context;
/// `chunks_with_context.json` is written only after augmentation and is
/// removed otherwise so queries never see a stale augmented corpus.
pub struct PersistStage {
    pub corpus: CorpusConfig,
}

#[async_trait]
impl Stage for PersistStage {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let verses_path = self.corpus.verses_path();
        save_verses(&verses_path, &state.verses)?;
        state.written.push(verses_path);

        let chunks_path = self.corpus.chunks_path();
        let contextual_path = self.corpus.contextual_chunks_path();

        if state.augment.is_some() {
            let plain: Vec<Chunk> = state
                .chunks
                .iter()
                .map(|c| Chunk {
                    context: None,
                    ..c.clone()
                })
                .collect();
            save_chunks(&chunks_path, &plain)?;
            save_chunks(&contextual_path, &state.chunks)?;
            state.written.push(chunks_path);
            state.written.push(contextual_path);
        } else {
            save_chunks(&chunks_path, &state.chunks)?;
            state.written.push(chunks_path);
            if contextual_path.exists() {
                warn!(path = %contextual_path.display(), "removing stale augmented corpus");
                std::fs::remove_file(&contextual_path).with_context(|| {
                    format!("Failed to remove {}", contextual_path.display())
                })?;
            }
        }
        Ok(())
    }
}

/// Build the hybrid index and persist its vector snapshot.
pub struct IndexStage {
    pub config: Config,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

#[async_trait]
impl Stage for IndexStage {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn run(&self, state: &mut PipelineState) -> Result<()> {
        let index = build_index(&self.config, &state.chunks, Arc::clone(&self.embedder)).await?;
        let path = self.config.corpus.vectors_path();
        VectorSnapshot::from_index(index.vector_index(), self.embedder.model_name()).save(&path)?;
        state.written.push(path);
        state.index = Some(index);
        Ok(())
    }
}

/// An ordered list of stages.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, mut state: PipelineState) -> Result<PipelineState> {
        for stage in &self.stages {
            let started = Instant::now();
            stage
                .run(&mut state)
                .await
                .with_context(|| format!("{} stage failed", stage.name()))?;
            info!(
                stage = stage.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                verses = state.verses.len(),
                chunks = state.chunks.len(),
                "stage complete"
            );
        }
        Ok(state)
    }
}

/// Options for `sctx ingest`.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub input: PathBuf,
    pub skip_context: bool,
    pub build_index: bool,
    pub sample_size: Option<usize>,
    pub progress: ProgressMode,
}

/// Compose the ingest pipeline from configuration and capabilities.
pub fn ingest_pipeline(
    config: &Config,
    options: &IngestOptions,
    generator: Option<Arc<dyn ContextGenerator>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new()
        .stage(ParseStage {
            input: options.input.clone(),
            config: config.parse.clone(),
            sample_size: options.sample_size,
        })
        .stage(ChunkStage::from_config(config)?);

    if let Some(generator) = generator {
        pipeline = pipeline.stage(AugmentStage {
            augmenter: ContextAugmenter::new(generator, AugmentConfig::from(&config.context)),
            progress: options.progress.reporter(),
        });
    }

    pipeline = pipeline.stage(PersistStage {
        corpus: config.corpus.clone(),
    });

    if let Some(embedder) = embedder {
        pipeline = pipeline.stage(IndexStage {
            config: config.clone(),
            embedder,
        });
    }
    Ok(pipeline)
}

/// Run the ingest command and print a summary.
pub async fn run_ingest(config: &Config, options: &IngestOptions) -> Result<()> {
    let generator = if options.skip_context {
        None
    } else {
        if !config.context.is_enabled() {
            bail!(
                "Context generation is disabled in config. Pass --skip-context or set [context] provider."
            );
        }
        Some(create_generator(&config.context)?)
    };
    let embedder = if options.build_index {
        if !config.embedding.is_enabled() {
            bail!("--index requires embeddings. Set [embedding] provider in config.");
        }
        Some(create_provider(&config.embedding)?)
    } else {
        None
    };

    let pipeline = ingest_pipeline(config, options, generator, embedder)?;
    let state = pipeline.run(PipelineState::default()).await?;

    println!("ingest {}", options.input.display());
    println!("  stages: {}", pipeline.stage_names().join(" -> "));
    println!("  verses parsed: {}", state.verses.len());
    if !state.parse_errors.is_empty() {
        println!("  malformed lines skipped: {}", state.parse_errors.len());
    }
    println!(
        "  chunks: {} ({} passages, {} windows)",
        state.chunks.len(),
        state.passage_count(),
        state.window_count()
    );
    match &state.augment {
        Some(report) => {
            println!("  context generated: {}", report.succeeded);
            println!("  context failed: {}", report.failed());
            for failure in &report.failures {
                eprintln!("Warning: {}", failure);
            }
        }
        None => println!("  context generation: skipped"),
    }
    if let Some(index) = &state.index {
        println!("  chunks indexed: {}", index.len());
    }
    for path in &state.written {
        println!("  wrote: {}", path.display());
    }
    println!("ok");
    Ok(())
}

/// Run the augment command over an existing `chunks.json`.
pub async fn run_augment(
    config: &Config,
    batch_size: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    if !config.context.is_enabled() {
        bail!("Context generation is disabled. Set [context] provider in config.");
    }
    let chunks_path = config.corpus.chunks_path();
    let chunks = load_chunks(&chunks_path)?;

    let mut augment_config = AugmentConfig::from(&config.context);
    if let Some(n) = batch_size {
        augment_config.batch_size = n.max(1);
    }
    let augmenter = ContextAugmenter::new(create_generator(&config.context)?, augment_config);
    let (augmented, report) = augmenter.augment(&chunks, progress.reporter().as_ref()).await;

    let out = config.corpus.contextual_chunks_path();
    save_chunks(&out, &augmented)?;

    println!("augment {}", chunks_path.display());
    println!("  chunks: {}", report.total);
    println!("  context generated: {}", report.succeeded);
    println!("  context failed: {}", report.failed());
    for failure in &report.failures {
        eprintln!("Warning: {}", failure);
    }
    println!("  wrote: {}", out.display());
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::load_chunks;
    use crate::embedding::HashEmbedder;
    use std::io::Write;
    use tempfile::TempDir;

    struct FixedGenerator;

    #[async_trait]
    impl ContextGenerator for FixedGenerator {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("Creation week.".to_string())
        }
    }

    fn write_source(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("kjv.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "KJV").unwrap();
        writeln!(file).unwrap();
        for v in 1..=12 {
            writeln!(file, "Genesis 1:{} first chapter verse {}", v, v).unwrap();
        }
        for v in 1..=16 {
            writeln!(file, "Genesis 2:{} second chapter verse {}", v, v).unwrap();
        }
        path
    }

    fn options(input: PathBuf) -> IngestOptions {
        IngestOptions {
            input,
            skip_context: false,
            build_index: false,
            sample_size: None,
            progress: ProgressMode::Off,
        }
    }

    fn fast_config(dir: &std::path::Path) -> Config {
        let mut config = Config::minimal(dir.join("corpus"));
        config.context.batch_delay_ms = 0;
        config.context.retry_base_ms = 1;
        config
    }

    #[tokio::test]
    async fn test_skip_context_omits_augment_stage() {
        let tmp = TempDir::new().unwrap();
        let config = fast_config(tmp.path());
        let opts = options(write_source(tmp.path()));
        let pipeline = ingest_pipeline(&config, &opts, None, None).unwrap();
        assert_eq!(pipeline.stage_names(), vec!["parse", "chunk", "persist"]);

        let state = pipeline.run(PipelineState::default()).await.unwrap();
        assert_eq!(state.verses.len(), 28);
        assert_eq!(state.chunks.len(), 5);
        assert_eq!(state.passage_count(), 1);
        assert_eq!(state.window_count(), 4);
        assert!(state.augment.is_none());
        assert!(state.chunks.iter().all(|c| c.context.is_none()));
        assert!(!config.corpus.contextual_chunks_path().exists());
        assert_eq!(load_chunks(&config.corpus.chunks_path()).unwrap(), state.chunks);
    }

    #[tokio::test]
    async fn test_full_pipeline_writes_every_stage() {
        let tmp = TempDir::new().unwrap();
        let config = fast_config(tmp.path());
        let opts = options(write_source(tmp.path()));
        let pipeline = ingest_pipeline(
            &config,
            &opts,
            Some(Arc::new(FixedGenerator)),
            Some(Arc::new(HashEmbedder::new(32))),
        )
        .unwrap();
        assert_eq!(
            pipeline.stage_names(),
            vec!["parse", "chunk", "augment", "persist", "index"]
        );

        let state = pipeline.run(PipelineState::default()).await.unwrap();
        assert_eq!(state.augment.as_ref().unwrap().succeeded, 5);
        assert!(state.chunks.iter().all(|c| c.has_context()));
        assert_eq!(state.index.as_ref().unwrap().len(), 5);

        let plain = load_chunks(&config.corpus.chunks_path()).unwrap();
        assert!(plain.iter().all(|c| c.context.is_none()));
        let contextual = load_chunks(&config.corpus.contextual_chunks_path()).unwrap();
        assert_eq!(contextual, state.chunks);
        assert!(config.corpus.vectors_path().exists());
        assert!(config.corpus.verses_path().exists());
    }

    #[tokio::test]
    async fn test_sample_size_limits_verses() {
        let tmp = TempDir::new().unwrap();
        let config = fast_config(tmp.path());
        let mut opts = options(write_source(tmp.path()));
        opts.sample_size = Some(5);
        let state = ingest_pipeline(&config, &opts, None, None)
            .unwrap()
            .run(PipelineState::default())
            .await
            .unwrap();
        assert_eq!(state.verses.len(), 5);
        assert_eq!(state.chunks.len(), 1);
        assert_eq!(state.chunks[0].reference, "Genesis 1:1-5");
    }

    #[tokio::test]
    async fn test_rerun_without_context_removes_stale_augmented_file() {
        let tmp = TempDir::new().unwrap();
        let config = fast_config(tmp.path());
        let opts = options(write_source(tmp.path()));

        ingest_pipeline(&config, &opts, Some(Arc::new(FixedGenerator)), None)
            .unwrap()
            .run(PipelineState::default())
            .await
            .unwrap();
        assert!(config.corpus.contextual_chunks_path().exists());

        ingest_pipeline(&config, &opts, None, None)
            .unwrap()
            .run(PipelineState::default())
            .await
            .unwrap();
        assert!(!config.corpus.contextual_chunks_path().exists());
    }

    #[tokio::test]
    async fn test_missing_input_names_failing_stage() {
        let tmp = TempDir::new().unwrap();
        let config = fast_config(tmp.path());
        let opts = options(tmp.path().join("missing.txt"));
        let err = ingest_pipeline(&config, &opts, None, None)
            .unwrap()
            .run(PipelineState::default())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("parse stage failed"));
    }
}
