//! Index abstraction for Knowledge Harness.
//!
//! Two traits, one per retrieval strategy. Both are keyed by the item id
//! and both store the item fingerprint, which is how the query engine
//! tells a committed item from one that is only half written.
//!
//! | Trait | Backends |
//! |-------|----------|
//! | [`VectorIndex`] | [`memory::InMemoryVectorIndex`], `SqliteVectorIndex` (app) |
//! | [`LexicalIndex`] | [`memory::InMemoryLexicalIndex`], `SqliteLexicalIndex` (app) |
//!
//! Implementations must be `Send + Sync`; reads may run concurrently with a
//! single writer.

pub mod memory;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{ContentType, IndexMetadata, KnowledgeItem};

/// Vector plus metadata, handed to the vector index on write. The index
/// owns the vector afterwards.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: IndexMetadata,
}

/// A candidate returned by either index.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: String,
    /// Normalized score in `[0, 1]`.
    pub score: f64,
    /// Backend score before normalization (signed cosine, BM25).
    pub raw_score: f64,
    pub metadata: IndexMetadata,
}

/// Pre-filter applied inside both indexes. Empty lists match everything.
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub content_types: Vec<ContentType>,
    pub sources: Vec<String>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.content_types.is_empty() && self.sources.is_empty()
    }

    pub fn matches(&self, meta: &IndexMetadata) -> bool {
        (self.content_types.is_empty() || self.content_types.contains(&meta.content_type))
            && (self.sources.is_empty() || self.sources.iter().any(|s| s == &meta.source))
    }
}

/// One row of the `(content_type, source)` histogram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeSourceCount {
    pub content_type: ContentType,
    pub source: String,
    pub count: usize,
}

/// Semantic index over item embeddings.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for `entry.id`.
    ///
    /// The first write fixes the index dimensionality; later writes with a
    /// different length are rejected.
    async fn upsert(&self, entry: VectorEntry) -> Result<()>;

    /// Top-`k` entries by cosine similarity among those matching `filter`.
    async fn query(&self, vector: &[f32], k: usize, filter: &MetadataFilter)
        -> Result<Vec<IndexHit>>;

    /// Remove an entry. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Stored fingerprints for the given ids; unknown ids are absent.
    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    async fn count(&self) -> Result<usize>;

    /// Dimensionality fixed by the first write, if any.
    async fn dims(&self) -> Result<Option<usize>>;
}

/// Full-text index, which doubles as the item metadata store.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Insert or replace an item. An existing `created_at` is kept.
    async fn upsert(&self, item: &KnowledgeItem) -> Result<()>;

    /// Top-`k` items for a keyword query among those matching `filter`.
    async fn query(&self, text: &str, k: usize, filter: &MetadataFilter) -> Result<Vec<IndexHit>>;

    /// Remove an item. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, String>>;

    async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>>;

    /// Fetch several items at once. Missing ids are skipped.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<KnowledgeItem>>;

    /// Item counts grouped by content type and source.
    async fn counts(&self) -> Result<Vec<TypeSourceCount>>;
}

/// Error text for a vector whose length does not match the index.
pub fn dims_mismatch(expected: usize, got: usize) -> String {
    format!(
        "vector has {} dimensions but the index holds {}; re-index required",
        got, expected
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(ct: ContentType, source: &str) -> IndexMetadata {
        IndexMetadata {
            content_type: ct,
            source: source.to_string(),
            fingerprint: "f".to_string(),
        }
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let f = MetadataFilter::default();
        assert!(f.is_empty());
        assert!(f.matches(&meta(ContentType::Code, "a")));
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let f = MetadataFilter {
            content_types: vec![ContentType::Code, ContentType::Issue],
            sources: vec!["github".to_string()],
        };
        assert!(f.matches(&meta(ContentType::Issue, "github")));
        assert!(!f.matches(&meta(ContentType::Issue, "docs")));
        assert!(!f.matches(&meta(ContentType::Note, "github")));
    }
}
