//! SQLite-backed [`LexicalIndex`] and [`VectorIndex`] implementations.
//!
//! Both share one [`SqlitePool`]. The lexical side keeps item rows in
//! `items` plus an FTS5 mirror in `items_fts`; the vector side stores
//! little-endian f32 blobs in `item_vectors` and ranks them by brute-force
//! cosine similarity.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use knowledge_harness_core::embedding::{
    blob_to_vec, cosine_similarity, similarity_score, vec_to_blob,
};
use knowledge_harness_core::index::{
    dims_mismatch, IndexHit, LexicalIndex, MetadataFilter, TypeSourceCount, VectorEntry,
    VectorIndex,
};
use knowledge_harness_core::models::{ContentType, IndexMetadata, KnowledgeItem};
use knowledge_harness_core::text::{lexical_score, match_quality, tokenize, words};

/// Upper bound on FTS rows scored per query. Candidates are re-ranked by
/// match quality in Rust, so the SQL side must not cut at `k`.
const LEXICAL_CANDIDATE_CEILING: usize = 1000;

const ITEM_COLUMNS: &str = "id, source, content_type, title, content, metadata_json, \
                            tags_json, fingerprint, created_at, updated_at";

fn parse_content_type(raw: &str) -> Result<ContentType> {
    raw.parse::<ContentType>().map_err(|e| anyhow!(e))
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| anyhow!("timestamp out of range: {}", micros))
}

fn parse_tags(id: &str, tags_json: &str) -> Result<Vec<String>> {
    serde_json::from_str(tags_json).with_context(|| format!("corrupt tags_json for item {}", id))
}

fn row_to_item(row: &SqliteRow) -> Result<KnowledgeItem> {
    let id: String = row.get("id");
    let metadata_json: String = row.get("metadata_json");
    let tags_json: String = row.get("tags_json");
    let content_type: String = row.get("content_type");
    let metadata: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&metadata_json)
            .with_context(|| format!("corrupt metadata_json for item {}", id))?;
    let tags = parse_tags(&id, &tags_json)?;
    Ok(KnowledgeItem {
        id,
        title: row.get("title"),
        content: row.get("content"),
        content_type: parse_content_type(&content_type)?,
        source: row.get("source"),
        metadata,
        tags,
        created_at: from_micros(row.get("created_at"))?,
        updated_at: from_micros(row.get("updated_at"))?,
    })
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &MetadataFilter, alias: &str) {
    if !filter.content_types.is_empty() {
        qb.push(format!(" AND {}.content_type IN (", alias));
        let mut sep = qb.separated(", ");
        for ct in &filter.content_types {
            sep.push_bind(ct.as_str());
        }
        sep.push_unseparated(")");
    }
    if !filter.sources.is_empty() {
        qb.push(format!(" AND {}.source IN (", alias));
        let mut sep = qb.separated(", ");
        for source in &filter.sources {
            sep.push_bind(source.clone());
        }
        sep.push_unseparated(")");
    }
}

async fn fingerprints_from(
    pool: &SqlitePool,
    table: &str,
    id_column: &str,
    ids: &[String],
) -> Result<HashMap<String, String>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {id} AS id, fingerprint FROM {table} WHERE {id} IN (",
        id = id_column,
        table = table
    ));
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(id.clone());
    }
    sep.push_unseparated(")");

    let rows = qb.build().fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("id"), r.get::<String, _>("fingerprint")))
        .collect())
}

/// FTS5 lexical index over the `items` table.
pub struct SqliteLexicalIndex {
    pool: SqlitePool,
}

impl SqliteLexicalIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Prefix query for every term, joined with `OR`.
    fn fts_query(terms: &[String]) -> String {
        terms
            .iter()
            .map(|t| format!("\"{}\"*", t.replace('"', "")))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[async_trait]
impl LexicalIndex for SqliteLexicalIndex {
    async fn upsert(&self, item: &KnowledgeItem) -> Result<()> {
        let metadata_json = serde_json::to_string(&item.metadata)?;
        let tags_json = serde_json::to_string(&item.tags)?;
        let fingerprint = item.fingerprint();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO items (id, source, content_type, title, content, metadata_json,
                               tags_json, fingerprint, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                content_type = excluded.content_type,
                title = excluded.title,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                tags_json = excluded.tags_json,
                fingerprint = excluded.fingerprint,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(&item.source)
        .bind(item.content_type.as_str())
        .bind(&item.title)
        .bind(&item.content)
        .bind(&metadata_json)
        .bind(&tags_json)
        .bind(&fingerprint)
        .bind(item.created_at.timestamp_micros())
        .bind(item.updated_at.timestamp_micros())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM items_fts WHERE item_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO items_fts (item_id, title, content, tags) VALUES (?, ?, ?, ?)")
            .bind(&item.id)
            .bind(&item.title)
            .bind(&item.content)
            .bind(item.tags.join(" "))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, text: &str, k: usize, filter: &MetadataFilter) -> Result<Vec<IndexHit>> {
        let terms = tokenize(text);
        if terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT i.id, i.source, i.content_type, i.fingerprint, i.title, i.content, \
             i.tags_json, bm25(items_fts, 0.0, 2.0, 1.0, 0.5) AS rank \
             FROM items_fts JOIN items i ON i.id = items_fts.item_id \
             WHERE items_fts MATCH ",
        );
        qb.push_bind(Self::fts_query(&terms));
        push_filter(&mut qb, filter, "i");
        qb.push(" ORDER BY rank LIMIT ");
        qb.push_bind(k.max(LEXICAL_CANDIDATE_CEILING) as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .context("FTS query failed")?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let rank: f64 = row.get("rank");
            let title: String = row.get("title");
            let content: String = row.get("content");
            let tags_json: String = row.get("tags_json");
            let tags = parse_tags(&id, &tags_json)?;

            let mut tokens: HashSet<String> = words(&title).into_iter().collect();
            tokens.extend(words(&content));
            for tag in &tags {
                tokens.extend(words(tag));
            }

            let content_type: String = row.get("content_type");
            scored.push((
                id,
                -rank,
                match_quality(&terms, &tokens),
                IndexMetadata {
                    content_type: parse_content_type(&content_type)?,
                    source: row.get("source"),
                    fingerprint: row.get("fingerprint"),
                },
            ));
        }

        let max_raw = scored.iter().map(|s| s.1).fold(0.0, f64::max);
        let mut hits: Vec<IndexHit> = scored
            .into_iter()
            .map(|(id, raw, quality, metadata)| IndexHit {
                id,
                score: lexical_score(raw, max_raw, quality, terms.len()),
                raw_score: raw,
                metadata,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM items_fts WHERE item_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        fingerprints_from(&self.pool, "items", "id", ids).await
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let row = sqlx::query(&format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<KnowledgeItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM items WHERE id IN (", ITEM_COLUMNS));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.clone());
        }
        sep.push_unseparated(")");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn counts(&self) -> Result<Vec<TypeSourceCount>> {
        let rows = sqlx::query(
            "SELECT content_type, source, COUNT(*) AS n FROM items GROUP BY content_type, source",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let content_type: String = row.get("content_type");
            let n: i64 = row.get("n");
            out.push(TypeSourceCount {
                content_type: parse_content_type(&content_type)?,
                source: row.get("source"),
                count: n as usize,
            });
        }
        out.sort_by(|a, b| {
            a.content_type
                .cmp(&b.content_type)
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(out)
    }
}

/// Brute-force cosine vector index over the `item_vectors` table.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn meta(&self, key: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    /// Record the embedding model on first use and refuse a different one
    /// afterwards.
    pub async fn ensure_model(&self, model: &str) -> Result<()> {
        match self.meta("model").await? {
            Some(stored) if stored != model => bail!(
                "index was built with embedding model '{}' but '{}' is configured; \
                 re-index required",
                stored,
                model
            ),
            Some(_) => Ok(()),
            None => {
                sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('model', ?)")
                    .bind(model)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        if entry.vector.is_empty() {
            bail!("cannot index an empty vector");
        }
        let mut tx = self.pool.begin().await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dims'")
                .fetch_optional(&mut *tx)
                .await?;
        match stored.and_then(|v| v.parse::<usize>().ok()) {
            Some(d) if d != entry.vector.len() => bail!(dims_mismatch(d, entry.vector.len())),
            Some(_) => {}
            None => {
                sqlx::query("INSERT OR REPLACE INTO index_meta (key, value) VALUES ('dims', ?)")
                    .bind(entry.vector.len().to_string())
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO item_vectors (item_id, source, content_type, fingerprint, embedding)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                source = excluded.source,
                content_type = excluded.content_type,
                fingerprint = excluded.fingerprint,
                embedding = excluded.embedding
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.metadata.source)
        .bind(entry.metadata.content_type.as_str())
        .bind(&entry.metadata.fingerprint)
        .bind(vec_to_blob(&entry.vector))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>> {
        if let Some(d) = self.dims().await? {
            if d != vector.len() {
                bail!(dims_mismatch(d, vector.len()));
            }
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT v.item_id, v.source, v.content_type, v.fingerprint, v.embedding \
             FROM item_vectors v WHERE 1 = 1",
        );
        push_filter(&mut qb, filter, "v");
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let cos = cosine_similarity(vector, &blob_to_vec(&blob));
            let content_type: String = row.get("content_type");
            hits.push(IndexHit {
                id: row.get("item_id"),
                score: similarity_score(cos),
                raw_score: cos as f64,
                metadata: IndexMetadata {
                    content_type: parse_content_type(&content_type)?,
                    source: row.get("source"),
                    fingerprint: row.get("fingerprint"),
                },
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let removed = sqlx::query("DELETE FROM item_vectors WHERE item_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }

    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        fingerprints_from(&self.pool, "item_vectors", "item_id", ids).await
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM item_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn dims(&self) -> Result<Option<usize>> {
        Ok(self.meta("dims").await?.and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use knowledge_harness_core::models::RawRecord;
    use knowledge_harness_core::normalize::normalize;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_index_dir(tmp.path().join("data"));
        let pool = db::connect(&config).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, pool)
    }

    fn item(source: &str, key: &str, title: &str, content: &str) -> KnowledgeItem {
        normalize(
            RawRecord::new(key)
                .title(title)
                .content(content)
                .meta("path", key)
                .tags(["Ops"]),
            source,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_lexical_roundtrip_and_query() {
        let (_tmp, pool) = setup().await;
        let idx = SqliteLexicalIndex::new(pool);
        let a = item("docs", "queue.md", "Queue consumer", "add retry logic to the queue consumer");
        let b = item("docs", "fonts.md", "Fonts", "unrelated topic about fonts");
        idx.upsert(&a).await.unwrap();
        idx.upsert(&b).await.unwrap();

        let stored = idx.get(&a.id).await.unwrap().unwrap();
        assert_eq!(stored.content_type, ContentType::Documentation);
        assert_eq!(stored.source, "docs");
        assert_eq!(stored.tags, vec!["ops"]);
        assert_eq!(stored.metadata["path"], "queue.md");
        assert_eq!(
            stored.created_at.timestamp_micros(),
            a.created_at.timestamp_micros()
        );

        let hits = idx
            .query("retry queue", 10, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);
        assert!(hits[0].score > 0.0 && hits[0].score <= 1.0);
        assert_eq!(hits[0].metadata.fingerprint, a.fingerprint());
    }

    #[tokio::test]
    async fn test_lexical_upsert_keeps_created_at() {
        let (_tmp, pool) = setup().await;
        let idx = SqliteLexicalIndex::new(pool);
        let mut it = item("s", "k", "T", "first version");
        idx.upsert(&it).await.unwrap();
        let created = it.created_at;

        it.content = "second version".to_string();
        it.created_at = created + chrono::Duration::seconds(5);
        it.updated_at = created + chrono::Duration::seconds(5);
        idx.upsert(&it).await.unwrap();

        let stored = idx.get(&it.id).await.unwrap().unwrap();
        assert_eq!(stored.created_at.timestamp_micros(), created.timestamp_micros());
        assert_eq!(
            stored.updated_at.timestamp_micros(),
            it.updated_at.timestamp_micros()
        );
        let hits = idx
            .query("first", 10, &MetadataFilter::default())
            .await
            .unwrap();
        assert!(hits.is_empty(), "stale FTS row left behind");
    }

    #[tokio::test]
    async fn test_lexical_filters_and_counts() {
        let (_tmp, pool) = setup().await;
        let idx = SqliteLexicalIndex::new(pool);
        idx.upsert(&item("docs", "a.md", "Deploy", "deploy guide")).await.unwrap();
        idx.upsert(&item("repo", "b.rs", "Deploy", "deploy code")).await.unwrap();
        idx.upsert(&item("repo", "c.rs", "Other", "other code")).await.unwrap();

        let filter = MetadataFilter {
            content_types: vec![ContentType::Code],
            sources: vec!["repo".to_string()],
        };
        let hits = idx.query("deploy", 10, &filter).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.content_type, ContentType::Code);

        let counts = idx.counts().await.unwrap();
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].content_type, ContentType::Code);
        assert_eq!(counts[0].count, 2);
    }

    #[tokio::test]
    async fn test_lexical_exact_match_beats_prefix_matches() {
        let (_tmp, pool) = setup().await;
        let idx = SqliteLexicalIndex::new(pool);
        let filler = vec!["lorem"; 150].join(" ");
        let exact = item("s", "long.md", "Notes", &format!("queue {}", filler));
        let p1 = item("s", "p1.md", "Plural", "queues");
        let p2 = item("s", "p2.md", "Plural twice", "queues queues");
        for it in [&exact, &p1, &p2] {
            idx.upsert(it).await.unwrap();
        }

        let hits = idx
            .query("queue", 2, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, exact.id);
        assert!(hits[0].score > hits[1].score);
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score <= 1.0));
    }

    #[tokio::test]
    async fn test_corrupt_row_json_is_an_error() {
        let (_tmp, pool) = setup().await;
        let idx = SqliteLexicalIndex::new(pool.clone());
        let it = item("s", "k.md", "Queue", "queue body");
        idx.upsert(&it).await.unwrap();

        sqlx::query("UPDATE items SET tags_json = 'not json' WHERE id = ?")
            .bind(&it.id)
            .execute(&pool)
            .await
            .unwrap();

        let err = idx.get(&it.id).await.unwrap_err();
        assert!(format!("{:#}", err).contains("corrupt tags_json"));
        assert!(idx
            .query("queue", 5, &MetadataFilter::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_vector_roundtrip_and_dims() {
        let (_tmp, pool) = setup().await;
        let idx = SqliteVectorIndex::new(pool);
        let a = item("s", "a", "A", "a");
        let b = item("s", "b", "B", "b");
        for (it, v) in [(&a, vec![1.0, 0.0]), (&b, vec![0.0, 1.0])] {
            idx.upsert(VectorEntry {
                id: it.id.clone(),
                vector: v,
                metadata: it.index_metadata(),
            })
            .await
            .unwrap();
        }
        assert_eq!(idx.dims().await.unwrap(), Some(2));
        assert_eq!(idx.count().await.unwrap(), 2);

        let hits = idx
            .query(&[0.9, 0.1], 1, &MetadataFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);

        let err = idx
            .upsert(VectorEntry {
                id: a.id.clone(),
                vector: vec![1.0, 0.0, 0.0],
                metadata: a.index_metadata(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("re-index required"));

        assert!(idx.delete(&a.id).await.unwrap());
        let fps = idx.fingerprints(&[a.id.clone(), b.id.clone()]).await.unwrap();
        assert_eq!(fps.len(), 1);
    }

    #[tokio::test]
    async fn test_model_change_requires_reindex() {
        let (_tmp, pool) = setup().await;
        let idx = SqliteVectorIndex::new(pool);
        idx.ensure_model("fnv1a-hash").await.unwrap();
        idx.ensure_model("fnv1a-hash").await.unwrap();
        let err = idx.ensure_model("text-embedding-3-small").await.unwrap_err();
        assert!(err.to_string().contains("re-index required"));
    }
}
