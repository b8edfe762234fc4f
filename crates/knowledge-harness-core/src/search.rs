//! Hybrid query engine over a [`VectorIndex`] and a [`LexicalIndex`].
//!
//! The engine has no database or configuration dependencies. The calling
//! application builds the indexes and the embedding provider and hands them
//! to [`HybridSearcher::new`].
//!
//! # Algorithm
//!
//! 1. Tokenize the query; no tokens means no results and no index calls.
//! 2. Validate the limit and filters.
//! 3. Concurrently: embed the query and fetch `multiplier × limit` vector
//!    candidates, and fetch as many lexical candidates.
//! 4. If one path fails, continue with the other and mark the response as
//!    degraded. If both fail, return [`KnowledgeError::SearchUnavailable`].
//! 5. Merge by id and fuse scores with the configured [`FusionStrategy`].
//! 6. Drop ids whose fingerprints disagree between the two indexes.
//! 7. Hydrate items from the lexical store, apply the tag filter, highlight.
//! 8. Sort by score (desc), `updated_at` (desc), id (asc) and truncate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::embedding::{check_batch, EmbeddingProvider};
use crate::error::KnowledgeError;
use crate::highlight::highlight;
use crate::index::{IndexHit, LexicalIndex, MetadataFilter, VectorIndex};
use crate::models::{
    ContentType, IndexMetadata, MatchContext, RetrievalPath, SearchResponse, SearchResult,
};
use crate::text::tokenize;

/// Largest accepted `limit`.
pub const MAX_LIMIT: usize = 200;

/// How vector and lexical scores combine into one score in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum FusionStrategy {
    /// `max(vector, lexical)`.
    #[default]
    Max,
    /// `(1 - alpha) × lexical + alpha × vector`.
    Weighted { alpha: f64 },
    /// Reciprocal rank fusion, rescaled by its best possible value `2 / (k + 1)`.
    Rrf { k: f64 },
}

impl FusionStrategy {
    pub fn label(&self) -> String {
        match self {
            FusionStrategy::Max => "max".to_string(),
            FusionStrategy::Weighted { alpha } => format!("weighted(alpha={})", alpha),
            FusionStrategy::Rrf { k } => format!("rrf(k={})", k),
        }
    }

    /// Fuse one candidate. Each side is `(normalized score, 1-based rank)`.
    pub fn fuse(&self, vector: Option<(f64, usize)>, lexical: Option<(f64, usize)>) -> f64 {
        let v = vector.map(|(s, _)| s).unwrap_or(0.0);
        let l = lexical.map(|(s, _)| s).unwrap_or(0.0);
        let fused = match *self {
            FusionStrategy::Max => v.max(l),
            FusionStrategy::Weighted { alpha } => {
                let alpha = alpha.clamp(0.0, 1.0);
                (1.0 - alpha) * l + alpha * v
            }
            FusionStrategy::Rrf { k } => {
                let k = k.max(0.0);
                let rr = |side: Option<(f64, usize)>| {
                    side.map(|(_, rank)| 1.0 / (k + rank as f64)).unwrap_or(0.0)
                };
                (rr(vector) + rr(lexical)) / (2.0 / (k + 1.0))
            }
        };
        fused.clamp(0.0, 1.0)
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Candidates fetched per path, as a multiple of the requested limit.
    pub candidate_multiplier: usize,
    pub fusion: FusionStrategy,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            candidate_multiplier: 2,
            fusion: FusionStrategy::Max,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    /// Only return these content types (any of).
    pub content_types: Vec<ContentType>,
    /// Only return items from these sources (any of).
    pub sources: Vec<String>,
    /// Only return items carrying at least one of these tags.
    pub tags: Vec<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), KnowledgeError> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(KnowledgeError::InvalidFilter(format!(
                "limit must be between 1 and {}, got {}",
                MAX_LIMIT, self.limit
            )));
        }
        if self.sources.iter().any(|s| s.trim().is_empty()) {
            return Err(KnowledgeError::InvalidFilter(
                "source filter contains an empty name".to_string(),
            ));
        }
        if self.tags.iter().any(|t| t.trim().is_empty()) {
            return Err(KnowledgeError::InvalidFilter(
                "tag filter contains an empty tag".to_string(),
            ));
        }
        Ok(())
    }

    fn metadata_filter(&self) -> MetadataFilter {
        MetadataFilter {
            content_types: self.content_types.clone(),
            sources: self.sources.iter().map(|s| s.trim().to_string()).collect(),
        }
    }
}

#[derive(Default)]
struct Candidate {
    vector: Option<(f64, usize)>,
    lexical: Option<(f64, usize)>,
    raw_similarity: Option<f64>,
    raw_lexical: Option<f64>,
    metadata: Option<IndexMetadata>,
}

/// Queries both indexes and fuses their answers.
#[derive(Clone)]
pub struct HybridSearcher {
    vector: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: SearchParams,
}

impl HybridSearcher {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: SearchParams,
    ) -> Self {
        Self {
            vector,
            lexical,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    async fn vector_candidates(
        &self,
        query: &str,
        k: usize,
        filter: &MetadataFilter,
    ) -> anyhow::Result<Vec<IndexHit>> {
        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        check_batch(&vectors, 1, self.embedder.dims())?;
        self.vector.query(&vectors[0], k, filter).await
    }

    /// Run a hybrid search.
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse, KnowledgeError> {
        let started = Instant::now();

        if tokenize(&req.query).is_empty() {
            return Ok(SearchResponse::empty(started.elapsed()));
        }
        req.validate()?;

        let filter = req.metadata_filter();
        let k = req.limit * self.params.candidate_multiplier.max(1);

        let (vector_res, lexical_res) = futures::join!(
            self.vector_candidates(&req.query, k, &filter),
            self.lexical.query(&req.query, k, &filter)
        );

        let mut degraded = None;
        let (vector_hits, lexical_hits) = match (vector_res, lexical_res) {
            (Ok(v), Ok(l)) => (v, l),
            (Err(e), Ok(l)) => {
                tracing::warn!(error = %e, "vector path failed, using lexical results only");
                degraded = Some(format!("vector search unavailable: {}", e));
                (Vec::new(), l)
            }
            (Ok(v), Err(e)) => {
                tracing::warn!(error = %e, "lexical path failed, using vector results only");
                degraded = Some(format!("lexical search unavailable: {}", e));
                (v, Vec::new())
            }
            (Err(ve), Err(le)) => {
                return Err(KnowledgeError::SearchUnavailable(format!(
                    "vector: {}; lexical: {}",
                    ve, le
                )));
            }
        };

        let mut candidates: HashMap<String, Candidate> = HashMap::new();
        for (rank, hit) in vector_hits.into_iter().enumerate() {
            let c = candidates.entry(hit.id).or_default();
            c.vector = Some((hit.score, rank + 1));
            c.raw_similarity = Some(hit.raw_score);
            if c.metadata.is_none() {
                c.metadata = Some(hit.metadata);
            }
        }
        for (rank, hit) in lexical_hits.into_iter().enumerate() {
            let c = candidates.entry(hit.id).or_default();
            c.lexical = Some((hit.score, rank + 1));
            c.raw_lexical = Some(hit.raw_score);
            c.metadata = Some(hit.metadata);
        }
        if candidates.is_empty() {
            return Ok(SearchResponse {
                results: Vec::new(),
                took: started.elapsed(),
                degraded,
            });
        }

        self.drop_inconsistent(&mut candidates).await;

        let ids: Vec<String> = candidates.keys().cloned().collect();
        let items = self
            .lexical
            .get_many(&ids)
            .await
            .map_err(|e| KnowledgeError::SearchUnavailable(format!("item lookup: {}", e)))?;

        let fusion_label = self.params.fusion.label();
        let mut results: Vec<SearchResult> = items
            .into_iter()
            .filter(|item| req.tags.is_empty() || item.has_any_tag(&req.tags))
            .filter_map(|item| {
                let c = candidates.get(&item.id)?;
                let score = self.params.fusion.fuse(c.vector, c.lexical);
                let mut paths = Vec::new();
                if c.vector.is_some() {
                    paths.push(RetrievalPath::Vector);
                }
                if c.lexical.is_some() {
                    paths.push(RetrievalPath::Lexical);
                }
                let context = MatchContext {
                    paths,
                    vector_score: c.vector.map(|(s, _)| s),
                    lexical_score: c.lexical.map(|(s, _)| s),
                    raw_similarity: c.raw_similarity,
                    raw_lexical: c.raw_lexical,
                    fusion: fusion_label.clone(),
                };
                Some(SearchResult {
                    highlight: highlight(&item.content, &req.query),
                    item,
                    score,
                    context,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.item.updated_at.cmp(&a.item.updated_at))
                .then_with(|| a.item.id.cmp(&b.item.id))
        });
        results.truncate(req.limit);

        tracing::debug!(
            query = %req.query,
            results = results.len(),
            degraded = degraded.is_some(),
            "search complete"
        );

        Ok(SearchResponse {
            results,
            took: started.elapsed(),
            degraded,
        })
    }

    /// Keep only ids that both indexes hold at the same fingerprint.
    ///
    /// An index whose lookup fails is left out of the comparison; that path
    /// is already reported as degraded.
    async fn drop_inconsistent(&self, candidates: &mut HashMap<String, Candidate>) {
        let ids: Vec<String> = candidates.keys().cloned().collect();
        let (vector_fps, lexical_fps) = futures::join!(
            self.vector.fingerprints(&ids),
            self.lexical.fingerprints(&ids)
        );
        let vector_fps = vector_fps
            .map_err(|e| tracing::warn!(error = %e, "vector fingerprint lookup failed"))
            .ok();
        let lexical_fps = lexical_fps
            .map_err(|e| tracing::warn!(error = %e, "lexical fingerprint lookup failed"))
            .ok();

        candidates.retain(|id, c| {
            let expected = c.metadata.as_ref().map(|m| m.fingerprint.as_str());
            let agrees = |fps: &Option<HashMap<String, String>>| match fps {
                Some(map) => map.get(id).map(String::as_str) == expected,
                None => true,
            };
            let keep = expected.is_some() && agrees(&vector_fps) && agrees(&lexical_fps);
            if !keep {
                tracing::debug!(id = %id, "dropping candidate with mismatched fingerprints");
            }
            keep
        });
    }
}
