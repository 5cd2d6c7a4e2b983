//! # Scripture Harness CLI (`sctx`)
//!
//! The `sctx` binary drives the offline pipeline and answers queries.
//!
//! ## Usage
//!
//! ```bash
//! sctx --config ./config/sctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sctx ingest <file>` | Parse, chunk, optionally augment and index a verse file |
//! | `sctx augment` | Generate context for an existing `chunks.json` |
//! | `sctx index` | Embed the current corpus and write the vector snapshot |
//! | `sctx query "<text>"` | Hybrid query over the indexed corpus |
//! | `sctx stats` | Corpus and snapshot statistics |
//! | `sctx completions <shell>` | Print shell completions |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG=info` (or
//! `debug`) for more detail.

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use scripture_harness::config::{load_config, Config};
use scripture_harness::pipeline::{run_augment, run_ingest, IngestOptions};
use scripture_harness::progress::ProgressMode;
use scripture_harness::search::{run_query, QueryArgs};
use scripture_harness::snapshot::run_index;
use scripture_harness::stats::run_stats;

/// Scripture Harness CLI: contextual hybrid retrieval over the KJV Bible.
///
/// All commands except `completions` read a TOML configuration file. See
/// `config/sctx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sctx",
    about = "Scripture Harness: contextual hybrid retrieval over the King James Bible",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a verse file and run the offline pipeline.
    ///
    /// Stages: parse, chunk (with positional metadata), augment, persist,
    /// and optionally index. Outputs are written under `[corpus].dir`.
    Ingest {
        /// KJV source text, one verse per line.
        input: PathBuf,

        /// Do not generate chunk context.
        #[arg(long)]
        skip_context: bool,

        /// Build and persist the vector snapshot after persisting chunks.
        #[arg(long)]
        index: bool,

        /// Only process the first N verses.
        #[arg(long)]
        sample_size: Option<usize>,

        #[arg(long)]
        window_size: Option<usize>,

        #[arg(long)]
        overlap_fraction: Option<f64>,

        #[arg(long)]
        max_passage_size: Option<usize>,

        /// Chunks submitted to the LLM concurrently.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Augmentation progress on stderr (default: human when stderr is a TTY).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Generate context for every chunk in `chunks.json`.
    Augment {
        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Embed the current corpus and write `vectors.json`.
    Index,

    /// Run a hybrid query.
    Query {
        text: String,

        /// Number of fused results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Show each hit's vector and BM25 ranks.
        #[arg(long)]
        explain: bool,

        /// Return BM25-only or vector-only results when the other side times out.
        #[arg(long)]
        allow_partial: bool,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show corpus statistics.
    Stats,

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "sctx", &mut std::io::stdout());
        return Ok(());
    }

    let mut cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest {
            input,
            skip_context,
            index,
            sample_size,
            window_size,
            overlap_fraction,
            max_passage_size,
            batch_size,
            progress,
        } => {
            apply_chunking_overrides(&mut cfg, window_size, overlap_fraction, max_passage_size);
            if let Some(n) = batch_size {
                cfg.context.batch_size = n;
            }
            cfg.validate()?;
            let options = IngestOptions {
                input,
                skip_context,
                build_index: index,
                sample_size,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
            };
            run_ingest(&cfg, &options).await?;
        }
        Commands::Augment {
            batch_size,
            progress,
        } => {
            run_augment(
                &cfg,
                batch_size,
                progress.unwrap_or_else(ProgressMode::default_for_tty),
            )
            .await?;
        }
        Commands::Index => {
            run_index(&cfg).await?;
        }
        Commands::Query {
            text,
            top_k,
            explain,
            allow_partial,
            json,
        } => {
            let args = QueryArgs {
                top_k,
                explain,
                allow_partial,
                json,
            };
            run_query(&cfg, &text, &args).await?;
        }
        Commands::Stats => {
            run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn apply_chunking_overrides(
    cfg: &mut Config,
    window_size: Option<usize>,
    overlap_fraction: Option<f64>,
    max_passage_size: Option<usize>,
) {
    if let Some(w) = window_size {
        cfg.chunking.window_size = w;
    }
    if let Some(o) = overlap_fraction {
        cfg.chunking.overlap_fraction = o;
    }
    if let Some(m) = max_passage_size {
        cfg.chunking.max_passage_size = m;
    }
}
