//! # Scripture Harness Core
//!
//! Shared, I/O-free logic for Scripture Harness: verse and chunk models,
//! the hybrid passage/window chunker, metadata enrichment, tokenization,
//! the embedding trait, the vector and BM25 sub-indices, the hybrid index
//! that pairs them, and reciprocal rank fusion.
//!
//! This crate contains no tokio, filesystem, or network dependencies.
//! Async appears only in the [`embedding::EmbeddingProvider`] trait so that
//! network-backed providers can live in the application crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod index;
pub mod lexical;
pub mod metadata;
pub mod models;
pub mod tokenize;
pub mod vector;

pub use error::{Error, Result};
