//! Core data models used throughout Knowledge Harness.
//!
//! These types represent the raw records, normalized items, and search
//! results that flow through the ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of content kinds an item can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Code,
    Documentation,
    Configuration,
    SecretMetadata,
    Repository,
    Issue,
    Commit,
    File,
    Note,
}

impl ContentType {
    pub const ALL: [ContentType; 9] = [
        ContentType::Code,
        ContentType::Documentation,
        ContentType::Configuration,
        ContentType::SecretMetadata,
        ContentType::Repository,
        ContentType::Issue,
        ContentType::Commit,
        ContentType::File,
        ContentType::Note,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Code => "code",
            ContentType::Documentation => "documentation",
            ContentType::Configuration => "configuration",
            ContentType::SecretMetadata => "secret_metadata",
            ContentType::Repository => "repository",
            ContentType::Issue => "issue",
            ContentType::Commit => "commit",
            ContentType::File => "file",
            ContentType::Note => "note",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(ContentType::Code),
            "documentation" | "docs" | "doc" => Ok(ContentType::Documentation),
            "configuration" | "config" => Ok(ContentType::Configuration),
            "secret_metadata" | "secret" => Ok(ContentType::SecretMetadata),
            "repository" | "repo" => Ok(ContentType::Repository),
            "issue" => Ok(ContentType::Issue),
            "commit" => Ok(ContentType::Commit),
            "file" => Ok(ContentType::File),
            "note" => Ok(ContentType::Note),
            other => Err(format!(
                "unknown content type '{}' (expected one of: {})",
                other,
                ContentType::ALL.map(|c| c.as_str()).join(", ")
            )),
        }
    }
}

/// Raw record produced by a collector before normalization.
///
/// Only `natural_key` identifies the record; everything else may be partial.
/// The normalizer decides what is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source-local identity, e.g. a repository path or commit SHA.
    pub natural_key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    /// Declared content type; inferred from the key when absent.
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RawRecord {
    pub fn new(natural_key: impl Into<String>) -> Self {
        Self {
            natural_key: natural_key.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Normalized unit of indexed content with a stable identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub content_type: ContentType,
    pub source: String,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeItem {
    /// Version stamp stored by both indexes; queries only surface an id
    /// when the two stamps agree.
    pub fn fingerprint(&self) -> String {
        crate::normalize::fingerprint(&self.source, self.content_type, &self.title, &self.content)
    }

    /// Filterable metadata shared by both indexes.
    pub fn index_metadata(&self) -> IndexMetadata {
        IndexMetadata {
            content_type: self.content_type,
            source: self.source.clone(),
            fingerprint: self.fingerprint(),
        }
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter()
            .any(|wanted| self.tags.iter().any(|t| t.eq_ignore_ascii_case(wanted)))
    }
}

/// Metadata stored next to every index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub content_type: ContentType,
    pub source: String,
    pub fingerprint: String,
}

/// Which retrieval strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalPath {
    Vector,
    Lexical,
}

/// Scoring provenance for a fused result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    pub paths: Vec<RetrievalPath>,
    /// Normalized vector score in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
    /// Normalized lexical score in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f64>,
    /// Signed cosine similarity before mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_similarity: Option<f64>,
    /// Engine-specific lexical score before rescaling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_lexical: Option<f64>,
    pub fusion: String,
}

/// A ranked result returned from the hybrid query engine.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub item: KnowledgeItem,
    /// Fused relevance score in `[0, 1]`.
    pub score: f64,
    pub highlight: String,
    pub context: MatchContext,
}

/// Ranked results plus execution time.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(with = "duration_millis")]
    pub took: Duration,
    /// Set when one retrieval path failed and results come from the other.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
}

impl SearchResponse {
    pub fn empty(took: Duration) -> Self {
        Self {
            results: Vec::new(),
            took,
            degraded: None,
        }
    }
}

/// Outcome of one collector source during a refresh.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub records: usize,
    pub indexed: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single item that did not make it into the indexes.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub source: String,
    pub key: String,
    pub kind: String,
    pub reason: String,
}

/// Summary returned by every refresh, even when every source failed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub items_collected: usize,
    pub items_failed: usize,
    pub sources_failed: usize,
    pub embeddings_reused: usize,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub sources: Vec<SourceReport>,
    pub failures: Vec<ItemFailure>,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_parse_aliases() {
        assert_eq!("config".parse::<ContentType>().unwrap(), ContentType::Configuration);
        assert_eq!("Docs".parse::<ContentType>().unwrap(), ContentType::Documentation);
        assert_eq!(
            "secret_metadata".parse::<ContentType>().unwrap(),
            ContentType::SecretMetadata
        );
        assert!("spreadsheet".parse::<ContentType>().is_err());
    }

    #[test]
    fn test_content_type_roundtrip_names() {
        for ct in ContentType::ALL {
            assert_eq!(ct.as_str().parse::<ContentType>().unwrap(), ct);
            let json = serde_json::to_string(&ct).unwrap();
            assert_eq!(json, format!("\"{}\"", ct.as_str()));
        }
    }

    #[test]
    fn test_raw_record_builder() {
        let rec = RawRecord::new("k1")
            .title("T")
            .content("body")
            .meta("stars", 3)
            .tags(["a", "b"]);
        assert_eq!(rec.natural_key, "k1");
        assert_eq!(rec.metadata["stars"], 3);
        assert_eq!(rec.tags, vec!["a", "b"]);
    }
}
