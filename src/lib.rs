//! # Scripture Harness
//!
//! Contextual retrieval over the King James Bible.
//!
//! Verses are grouped into passage-aware chunks, each chunk is given a
//! short LLM-generated context that situates it in the wider text, and the
//! contextualized chunks are indexed twice: by embedding similarity and by
//! BM25. Queries run both sub-queries and merge them with reciprocal rank
//! fusion.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────────┐
//! │  Verses  │──▶│ Chunker  │──▶│ Augmenter │──▶│ chunks JSON  │
//! │ kjv.txt  │   │ +enrich  │   │  (LLM)    │   │  on disk     │
//! └──────────┘   └──────────┘   └───────────┘   └──────┬───────┘
//!                                                      │
//!                         ┌────────────────────────────┤
//!                         ▼                            ▼
//!                   ┌───────────┐               ┌────────────┐
//!                   │  Vector   │               │    BM25    │
//!                   │ snapshot  │               │ (rebuilt)  │
//!                   └─────┬─────┘               └─────┬──────┘
//!                         └───────────┬───────────────┘
//!                                     ▼
//!                              ┌─────────────┐
//!                              │  RRF fuser  │
//!                              │ sctx query  │
//!                              └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sctx ingest data/raw/kjv.txt --skip-context --index   # parse, chunk, embed
//! sctx augment                                         # add LLM context
//! sctx index                                           # re-embed augmented corpus
//! sctx query "the lord is my shepherd" --explain
//! sctx stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`verses`] | KJV verse line reader |
//! | [`pipeline`] | Staged offline ingest |
//! | [`augment`] | Batched context generation with retries |
//! | [`llm`] | Context generation providers |
//! | [`embedding`] | Embedding provider implementations |
//! | [`corpus`] | Persisted stage outputs |
//! | [`snapshot`] | Vector snapshot and index loading |
//! | [`search`] | Hybrid query engine |
//! | [`stats`] | Corpus statistics |
//! | [`progress`] | Augmentation progress reporting |
//!
//! Chunking, the two sub-indices and fusion live in the
//! `scripture-harness-core` crate.

pub mod augment;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod llm;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod snapshot;
pub mod stats;
pub mod verses;
