//! The assembled knowledge base.
//!
//! [`KnowledgeBase`] wires the SQLite indexes, the embedding provider, the
//! configured collectors, the ingestion pipeline and the hybrid searcher
//! together. Every CLI command goes through it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use knowledge_harness_core::embedding::EmbeddingProvider;
use knowledge_harness_core::index::{LexicalIndex, VectorIndex};
use knowledge_harness_core::models::{ContentType, KnowledgeItem, RefreshSummary, SearchResponse};
use knowledge_harness_core::search::{HybridSearcher, SearchRequest};
use knowledge_harness_core::stats::{statistics, Statistics};
use knowledge_harness_core::KnowledgeError;

use crate::collector::{build_collectors, Collector};
use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::ingest::{IngestPipeline, IngestSettings};
use crate::migrate;
use crate::sqlite_index::{SqliteLexicalIndex, SqliteVectorIndex};

/// One row of the `refresh_runs` log.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub items_collected: i64,
    pub items_failed: i64,
    pub sources_failed: i64,
}

pub struct KnowledgeBase {
    config: Config,
    pool: SqlitePool,
    lexical: Arc<SqliteLexicalIndex>,
    vector: Arc<SqliteVectorIndex>,
    searcher: HybridSearcher,
    pipeline: IngestPipeline,
}

impl KnowledgeBase {
    /// Open (creating if needed) the index under `config.index.dir` with the
    /// collectors listed in the config.
    pub async fn open(config: &Config) -> Result<Self> {
        let collectors = build_collectors(config)?;
        Self::open_with_collectors(config, collectors).await
    }

    /// Open with an explicit collector list.
    pub async fn open_with_collectors(
        config: &Config,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        Self::open_with(config, collectors, embedder).await
    }

    /// Open with explicit collectors and embedding provider.
    pub async fn open_with(
        config: &Config,
        collectors: Vec<Arc<dyn Collector>>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        let lexical = Arc::new(SqliteLexicalIndex::new(pool.clone()));
        let vector = Arc::new(SqliteVectorIndex::new(pool.clone()));
        vector.ensure_model(embedder.model_name()).await?;

        let searcher = HybridSearcher::new(
            vector.clone(),
            lexical.clone(),
            embedder.clone(),
            config.retrieval.search_params()?,
        );
        let pipeline = IngestPipeline::new(
            collectors,
            vector.clone(),
            lexical.clone(),
            embedder,
            IngestSettings::from_config(config),
        );

        Ok(Self {
            config: config.clone(),
            pool,
            lexical,
            vector,
            searcher,
            pipeline,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        self.pipeline.collectors()
    }

    /// Run every collector and index the results. The run is logged to
    /// `refresh_runs`; failing to log it only produces a warning.
    pub async fn refresh(&self) -> RefreshSummary {
        let started_at = Utc::now();
        let summary = self.pipeline.refresh().await;
        if let Err(e) = self.record_run(started_at, &summary).await {
            tracing::warn!(error = %e, "failed to record refresh run");
        }
        summary
    }

    async fn record_run(&self, started_at: DateTime<Utc>, summary: &RefreshSummary) -> Result<()> {
        sqlx::query(
            "INSERT INTO refresh_runs (id, started_at, duration_ms, items_collected, \
             items_failed, sources_failed, summary_json) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(started_at.timestamp_micros())
        .bind(summary.duration.as_millis() as i64)
        .bind(summary.items_collected as i64)
        .bind(summary.items_failed as i64)
        .bind(summary.sources_failed as i64)
        .bind(serde_json::to_string(summary)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The most recent refresh run, if any.
    pub async fn last_refresh(&self) -> Result<Option<RefreshRun>> {
        let row = sqlx::query(
            "SELECT id, started_at, duration_ms, items_collected, items_failed, sources_failed \
             FROM refresh_runs ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            let micros: i64 = r.get("started_at");
            Ok(RefreshRun {
                id: r.get("id"),
                started_at: DateTime::<Utc>::from_timestamp_micros(micros)
                    .ok_or_else(|| anyhow::anyhow!("invalid refresh timestamp: {}", micros))?,
                duration_ms: r.get("duration_ms"),
                items_collected: r.get("items_collected"),
                items_failed: r.get("items_failed"),
                sources_failed: r.get("sources_failed"),
            })
        })
        .transpose()
    }

    /// Hybrid search bounded by `retrieval.search_timeout_secs`.
    pub async fn search(&self, req: &SearchRequest) -> Result<SearchResponse, KnowledgeError> {
        let deadline = Duration::from_secs(self.config.retrieval.search_timeout_secs);
        match tokio::time::timeout(deadline, self.searcher.search(req)).await {
            Ok(result) => result,
            Err(_) => Err(KnowledgeError::SearchUnavailable(format!(
                "query timed out after {}s",
                deadline.as_secs()
            ))),
        }
    }

    pub async fn statistics(&self) -> Result<Statistics> {
        statistics(self.lexical.as_ref(), self.vector.as_ref()).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        self.lexical.get(id).await
    }

    /// Remove `id` from both indexes. Returns whether anything was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let lexical = self.lexical.delete(id).await?;
        let vector = self.vector.delete(id).await?;
        Ok(lexical || vector)
    }

    /// Close the pool, flushing the WAL.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Parse content type names from user input. Unknown names are an
/// [`KnowledgeError::InvalidFilter`].
pub fn parse_content_types(names: &[String]) -> Result<Vec<ContentType>, KnowledgeError> {
    names
        .iter()
        .map(|n| {
            n.parse::<ContentType>()
                .map_err(|e| KnowledgeError::InvalidFilter(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_types() {
        let parsed =
            parse_content_types(&["code".to_string(), "config".to_string()]).unwrap();
        assert_eq!(parsed, vec![ContentType::Code, ContentType::Configuration]);

        let err = parse_content_types(&["podcast".to_string()]).unwrap_err();
        assert_eq!(err.kind(), "invalid_filter");
    }
}
