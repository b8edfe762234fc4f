//! Error taxonomy for ingestion and retrieval.
//!
//! Every variant maps to one failure scope: a single item, a single
//! embedding batch, a single collector source, or a single query. Refresh
//! aggregates these into a summary instead of propagating them; search
//! returns them directly so "no matches" and "search unavailable" stay
//! distinguishable.

use thiserror::Error;

/// Domain errors raised by the knowledge engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum KnowledgeError {
    /// A raw record could not be normalized (missing title/content/key,
    /// unknown content type). Per-item, skipped and reported.
    #[error("malformed item: {0}")]
    MalformedItem(String),

    /// The embedding model or service could not produce vectors.
    /// Per-batch, retried then skipped and reported.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Writing an item to one of the indexes failed. Per-item, retried then
    /// rolled back from both indexes.
    #[error("index write failed for {id}: {reason}")]
    IndexWriteFailure { id: String, reason: String },

    /// A collector errored or timed out. Per-source, other sources continue.
    #[error("collector '{source_name}' failed: {reason}")]
    CollectorFailure { source_name: String, reason: String },

    /// A query carried an invalid filter or limit. No partial results.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Neither retrieval path could answer the query.
    #[error("search unavailable: {0}")]
    SearchUnavailable(String),
}

impl KnowledgeError {
    /// Short, stable label used in refresh summaries and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedItem(_) => "malformed_item",
            Self::EmbeddingUnavailable(_) => "embedding_unavailable",
            Self::IndexWriteFailure { .. } => "index_write_failure",
            Self::CollectorFailure { .. } => "collector_failure",
            Self::InvalidFilter(_) => "invalid_filter",
            Self::SearchUnavailable(_) => "search_unavailable",
        }
    }
}

pub type Result<T> = std::result::Result<T, KnowledgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(KnowledgeError::MalformedItem("x".into()).kind(), "malformed_item");
        assert_eq!(
            KnowledgeError::CollectorFailure {
                source_name: "docs".into(),
                reason: "timeout".into()
            }
            .kind(),
            "collector_failure"
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = KnowledgeError::IndexWriteFailure {
            id: "abc".into(),
            reason: "disk full".into(),
        };
        assert_eq!(err.to_string(), "index write failed for abc: disk full");
    }
}
