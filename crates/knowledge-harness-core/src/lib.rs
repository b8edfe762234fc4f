//! # Knowledge Harness Core
//!
//! Runtime-agnostic logic for Knowledge Harness: data models, item
//! normalization, index traits with in-memory backends, the hybrid query
//! engine, highlighting, and statistics.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! Those live in the `knowledge-harness` app crate.

pub mod embedding;
pub mod error;
pub mod highlight;
pub mod index;
pub mod models;
pub mod normalize;
pub mod search;
pub mod stats;
pub mod text;

pub use error::KnowledgeError;
