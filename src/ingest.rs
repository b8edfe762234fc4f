//! Ingestion pipeline orchestration.
//!
//! Coordinates a refresh: collect → normalize → embed → write. Sources run
//! as parallel tasks; inside a source, batches are embedded sequentially and
//! each item is written to the lexical index, then the vector index. A
//! failed write is rolled back from both before it is retried, so an item
//! is either present in both indexes or in neither.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SubsecRound, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use knowledge_harness_core::embedding::{check_batch, EmbeddingProvider};
use knowledge_harness_core::index::{LexicalIndex, VectorEntry, VectorIndex};
use knowledge_harness_core::models::{ItemFailure, KnowledgeItem, RefreshSummary, SourceReport};
use knowledge_harness_core::normalize::normalize_batch;
use knowledge_harness_core::KnowledgeError;

use crate::collector::Collector;
use crate::config::Config;

/// Retry, timeout and batching knobs for a refresh.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub embed_attempts: u32,
    pub write_attempts: u32,
    pub retry_base: Duration,
    pub collector_timeout: Duration,
    pub index_timeout: Duration,
    pub batch_size: usize,
    pub max_parallel_sources: usize,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            embed_attempts: config.ingest.embed_attempts.max(1),
            write_attempts: config.ingest.write_attempts.max(1),
            retry_base: Duration::from_millis(config.ingest.retry_base_ms),
            collector_timeout: Duration::from_secs(config.ingest.collector_timeout_secs),
            index_timeout: Duration::from_secs(config.ingest.index_timeout_secs),
            batch_size: config.embedding.batch_size.max(1),
            max_parallel_sources: config.ingest.max_parallel_sources.max(1),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * (1u32 << (attempt - 1).min(5))
    }
}

/// Runs every collector and writes what they produce into both indexes.
pub struct IngestPipeline {
    collectors: Vec<Arc<dyn Collector>>,
    vector: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: IngestSettings,
}

impl IngestPipeline {
    pub fn new(
        collectors: Vec<Arc<dyn Collector>>,
        vector: Arc<dyn VectorIndex>,
        lexical: Arc<dyn LexicalIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            collectors,
            vector,
            lexical,
            embedder,
            settings,
        }
    }

    pub fn collectors(&self) -> &[Arc<dyn Collector>] {
        &self.collectors
    }

    /// Collect from every source and index the results.
    ///
    /// Never fails as a whole: collector, embedding and write errors are
    /// folded into the returned summary.
    pub async fn refresh(&self) -> RefreshSummary {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_parallel_sources));
        let mut tasks = JoinSet::new();

        tracing::info!(sources = self.collectors.len(), "refresh started");

        for (pos, collector) in self.collectors.iter().enumerate() {
            let job = SourceJob {
                collector: Arc::clone(collector),
                vector: Arc::clone(&self.vector),
                lexical: Arc::clone(&self.lexical),
                embedder: Arc::clone(&self.embedder),
                settings: self.settings.clone(),
            };
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (pos, job.run().await)
            });
        }

        let mut outcomes: Vec<(usize, SourceOutcome)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "source task aborted"),
            }
        }

        let finished: HashSet<usize> = outcomes.iter().map(|(pos, _)| *pos).collect();
        for (pos, collector) in self.collectors.iter().enumerate() {
            if !finished.contains(&pos) {
                outcomes.push((
                    pos,
                    SourceOutcome::collector_failed(collector.name(), "task aborted".to_string()),
                ));
            }
        }
        outcomes.sort_by_key(|(pos, _)| *pos);

        let mut summary = RefreshSummary::default();
        for (_, outcome) in outcomes {
            summary.items_collected += outcome.report.indexed;
            summary.items_failed += outcome.report.failed;
            if outcome.report.error.is_some() {
                summary.sources_failed += 1;
            }
            summary.embeddings_reused += outcome.reused;
            summary.sources.push(outcome.report);
            summary.failures.extend(outcome.failures);
        }
        summary.duration = start.elapsed();

        tracing::info!(
            indexed = summary.items_collected,
            failed = summary.items_failed,
            sources_failed = summary.sources_failed,
            reused = summary.embeddings_reused,
            took_ms = summary.duration.as_millis() as u64,
            "refresh finished"
        );
        summary
    }
}

struct SourceOutcome {
    report: SourceReport,
    failures: Vec<ItemFailure>,
    reused: usize,
}

impl SourceOutcome {
    fn collector_failed(source: &str, reason: String) -> Self {
        let err = KnowledgeError::CollectorFailure {
            source_name: source.to_string(),
            reason,
        };
        tracing::warn!(source, error = %err, "source skipped");
        Self {
            report: SourceReport {
                source: source.to_string(),
                failed: 1,
                error: Some(err.to_string()),
                ..Default::default()
            },
            failures: vec![ItemFailure {
                source: source.to_string(),
                key: String::new(),
                kind: err.kind().to_string(),
                reason: err.to_string(),
            }],
            reused: 0,
        }
    }
}

/// Everything one source task needs, owned so it can be spawned.
struct SourceJob {
    collector: Arc<dyn Collector>,
    vector: Arc<dyn VectorIndex>,
    lexical: Arc<dyn LexicalIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: IngestSettings,
}

impl SourceJob {
    async fn run(self) -> SourceOutcome {
        let source = self.collector.name().to_string();

        let mut records = match tokio::time::timeout(
            self.settings.collector_timeout,
            self.collector.collect(),
        )
        .await
        {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return SourceOutcome::collector_failed(&source, format!("{:#}", e)),
            Err(_) => {
                return SourceOutcome::collector_failed(
                    &source,
                    format!(
                        "timed out after {}s",
                        self.settings.collector_timeout.as_secs_f64()
                    ),
                )
            }
        };
        records.truncate(self.collector.max_items());

        let mut outcome = SourceOutcome {
            report: SourceReport {
                source: source.clone(),
                records: records.len(),
                ..Default::default()
            },
            failures: Vec::new(),
            reused: 0,
        };

        // Microsecond precision is what the persistent stores keep.
        let now = Utc::now().trunc_subsecs(6);
        let (items, malformed) = normalize_batch(records, &source, now);
        outcome.failures.extend(malformed);

        for batch in items.chunks(self.settings.batch_size) {
            self.process_batch(batch, &mut outcome).await;
        }

        outcome.report.failed = outcome.failures.len();
        tracing::info!(
            source = %source,
            records = outcome.report.records,
            indexed = outcome.report.indexed,
            failed = outcome.report.failed,
            "source indexed"
        );
        outcome
    }

    async fn process_batch(&self, batch: &[KnowledgeItem], outcome: &mut SourceOutcome) {
        let ids: Vec<String> = batch.iter().map(|i| i.id.clone()).collect();
        let stored = match self.vector.fingerprints(&ids).await {
            Ok(map) => map,
            Err(e) => {
                tracing::debug!(error = %e, "fingerprint lookup failed, embedding everything");
                Default::default()
            }
        };

        let (reused, fresh): (Vec<&KnowledgeItem>, Vec<&KnowledgeItem>) = batch
            .iter()
            .partition(|item| stored.get(&item.id) == Some(&item.fingerprint()));

        for item in reused {
            if self.write_item(item, None, outcome).await {
                outcome.reused += 1;
            }
        }

        if fresh.is_empty() {
            return;
        }

        match self.embed_with_retry(&fresh).await {
            Ok(vectors) => {
                for (item, vector) in fresh.into_iter().zip(vectors) {
                    self.write_item(item, Some(vector), outcome).await;
                }
            }
            Err(err) => {
                for item in fresh {
                    outcome.failures.push(failure(item, &err));
                }
            }
        }
    }

    async fn embed_with_retry(
        &self,
        items: &[&KnowledgeItem],
    ) -> Result<Vec<Vec<f32>>, KnowledgeError> {
        let texts: Vec<String> = items
            .iter()
            .map(|i| format!("{}\n{}", i.title, i.content))
            .collect();

        let mut last_err = String::new();
        for attempt in 1..=self.settings.embed_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.settings.backoff(attempt - 1)).await;
            }
            let result = self.embedder.embed(&texts).await.and_then(|vectors| {
                check_batch(&vectors, texts.len(), self.embedder.dims())?;
                Ok(vectors)
            });
            match result {
                Ok(vectors) => return Ok(vectors),
                Err(e) => last_err = format!("{:#}", e),
            }
            tracing::warn!(attempt, error = %last_err, "embedding batch failed");
        }
        Err(KnowledgeError::EmbeddingUnavailable(last_err))
    }

    /// Write one item, retrying with rollback. `vector` is `None` when the
    /// stored embedding is still valid. Returns whether the item landed.
    async fn write_item(
        &self,
        item: &KnowledgeItem,
        vector: Option<Vec<f32>>,
        outcome: &mut SourceOutcome,
    ) -> bool {
        let mut last_err = String::new();
        for attempt in 1..=self.settings.write_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.settings.backoff(attempt - 1)).await;
            }
            match self.try_write(item, vector.as_ref()).await {
                Ok(()) => {
                    outcome.report.indexed += 1;
                    return true;
                }
                Err(e) => {
                    last_err = e;
                    tracing::warn!(id = %item.id, attempt, error = %last_err, "index write failed");
                    self.rollback(&item.id, vector.is_some()).await;
                }
            }
        }
        if vector.is_none() {
            self.rollback(&item.id, true).await;
        }

        let err = KnowledgeError::IndexWriteFailure {
            id: item.id.clone(),
            reason: last_err,
        };
        outcome.failures.push(failure(item, &err));
        false
    }

    async fn try_write(
        &self,
        item: &KnowledgeItem,
        vector: Option<&Vec<f32>>,
    ) -> Result<(), String> {
        let timeout = self.settings.index_timeout;

        tokio::time::timeout(timeout, self.lexical.upsert(item))
            .await
            .map_err(|_| "lexical write timed out".to_string())?
            .map_err(|e| format!("lexical: {:#}", e))?;

        if let Some(vector) = vector {
            let entry = VectorEntry {
                id: item.id.clone(),
                vector: vector.clone(),
                metadata: item.index_metadata(),
            };
            tokio::time::timeout(timeout, self.vector.upsert(entry))
                .await
                .map_err(|_| "vector write timed out".to_string())?
                .map_err(|e| format!("vector: {:#}", e))?;
        }
        Ok(())
    }

    /// Remove partial state for `id`. A reused vector is kept until the
    /// item is given up on, since it cannot be rewritten.
    async fn rollback(&self, id: &str, include_vector: bool) {
        if let Err(e) = self.lexical.delete(id).await {
            tracing::warn!(id, error = %e, "lexical rollback failed");
        }
        if !include_vector {
            return;
        }
        if let Err(e) = self.vector.delete(id).await {
            tracing::warn!(id, error = %e, "vector rollback failed");
        }
    }
}

fn failure(item: &KnowledgeItem, err: &KnowledgeError) -> ItemFailure {
    ItemFailure {
        source: item.source.clone(),
        key: item.id.clone(),
        kind: err.kind().to_string(),
        reason: err.to_string(),
    }
}

/// `kb refresh`: run every configured collector and print the summary.
pub async fn run_refresh(config: &Config, json: bool) -> anyhow::Result<()> {
    let kb = crate::engine::KnowledgeBase::open(config).await?;
    let summary = kb.refresh().await;
    kb.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("refresh");
    for source in &summary.sources {
        match &source.error {
            Some(err) => println!("  {:<16} FAILED  {}", source.source, err),
            None => println!(
                "  {:<16} {} records, {} indexed, {} failed",
                source.source, source.records, source.indexed, source.failed
            ),
        }
    }
    println!("  items indexed: {}", summary.items_collected);
    println!("  items failed: {}", summary.items_failed);
    println!("  sources failed: {}", summary.sources_failed);
    println!("  embeddings reused: {}", summary.embeddings_reused);
    println!("  duration: {} ms", summary.duration.as_millis());
    for failure in summary.failures.iter().take(20) {
        println!(
            "  ! {} {} [{}] {}",
            failure.source, failure.key, failure.kind, failure.reason
        );
    }
    if summary.failures.len() > 20 {
        println!("  ! ... {} more", summary.failures.len() - 20);
    }
    println!("ok");
    Ok(())
}
