//! In-memory index implementations for tests and embedded use.
//!
//! Both use `HashMap`s behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; lexical search is BM25 over the shared
//! tokenizer, blended with match quality.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::{cosine_similarity, similarity_score};
use crate::models::{IndexMetadata, KnowledgeItem};
use crate::text::{lexical_score, match_quality, tokenize, words};

use super::{
    dims_mismatch, IndexHit, LexicalIndex, MetadataFilter, TypeSourceCount, VectorEntry,
    VectorIndex,
};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

fn poisoned<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("index lock poisoned")
}

fn sort_hits(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

struct StoredVector {
    vector: Vec<f32>,
    metadata: IndexMetadata,
}

#[derive(Default)]
struct VectorState {
    dims: Option<usize>,
    entries: HashMap<String, StoredVector>,
}

/// In-memory [`VectorIndex`].
#[derive(Default)]
pub struct InMemoryVectorIndex {
    state: RwLock<VectorState>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entry: VectorEntry) -> Result<()> {
        let mut state = self.state.write().map_err(poisoned)?;
        match state.dims {
            Some(d) if d != entry.vector.len() => bail!(dims_mismatch(d, entry.vector.len())),
            Some(_) => {}
            None => {
                if entry.vector.is_empty() {
                    bail!("cannot index an empty vector");
                }
                state.dims = Some(entry.vector.len());
            }
        }
        state.entries.insert(
            entry.id,
            StoredVector {
                vector: entry.vector,
                metadata: entry.metadata,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<IndexHit>> {
        let state = self.state.read().map_err(poisoned)?;
        if let Some(d) = state.dims {
            if d != vector.len() {
                bail!(dims_mismatch(d, vector.len()));
            }
        }
        let mut hits: Vec<IndexHit> = state
            .entries
            .iter()
            .filter(|(_, sv)| filter.matches(&sv.metadata))
            .map(|(id, sv)| {
                let cos = cosine_similarity(vector, &sv.vector);
                IndexHit {
                    id: id.clone(),
                    score: similarity_score(cos),
                    raw_score: cos as f64,
                    metadata: sv.metadata.clone(),
                }
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().map_err(poisoned)?;
        Ok(state.entries.remove(id).is_some())
    }

    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let state = self.state.read().map_err(poisoned)?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                state
                    .entries
                    .get(id)
                    .map(|sv| (id.clone(), sv.metadata.fingerprint.clone()))
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().map_err(poisoned)?.entries.len())
    }

    async fn dims(&self) -> Result<Option<usize>> {
        Ok(self.state.read().map_err(poisoned)?.dims)
    }
}

struct StoredItem {
    item: KnowledgeItem,
    metadata: IndexMetadata,
    /// Term frequencies; title words count twice.
    tf: HashMap<String, usize>,
    length: usize,
}

impl StoredItem {
    fn new(item: KnowledgeItem) -> Self {
        let mut tokens = words(&item.title);
        tokens.extend(words(&item.title));
        tokens.extend(words(&item.content));
        for tag in &item.tags {
            tokens.extend(words(tag));
        }
        let length = tokens.len();
        let mut tf = HashMap::new();
        for t in tokens {
            *tf.entry(t).or_insert(0) += 1;
        }
        Self {
            metadata: item.index_metadata(),
            item,
            tf,
            length,
        }
    }
}

/// In-memory [`LexicalIndex`] with BM25 scoring.
#[derive(Default)]
pub struct InMemoryLexicalIndex {
    items: RwLock<HashMap<String, StoredItem>>,
}

impl InMemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LexicalIndex for InMemoryLexicalIndex {
    async fn upsert(&self, item: &KnowledgeItem) -> Result<()> {
        let mut items = self.items.write().map_err(poisoned)?;
        let mut item = item.clone();
        if let Some(existing) = items.get(&item.id) {
            item.created_at = existing.item.created_at;
        }
        items.insert(item.id.clone(), StoredItem::new(item));
        Ok(())
    }

    async fn query(&self, text: &str, k: usize, filter: &MetadataFilter) -> Result<Vec<IndexHit>> {
        let terms = tokenize(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let items = self.items.read().map_err(poisoned)?;
        let n = items.len() as f64;
        let avg_len = if items.is_empty() {
            1.0
        } else {
            (items.values().map(|s| s.length).sum::<usize>() as f64 / n).max(1.0)
        };
        let idf: HashMap<&str, f64> = terms
            .iter()
            .map(|t| {
                let df = items.values().filter(|s| s.tf.contains_key(t)).count() as f64;
                (t.as_str(), (1.0 + (n - df + 0.5) / (df + 0.5)).ln())
            })
            .collect();

        let mut scored: Vec<(&String, &StoredItem, f64, f64)> = Vec::new();
        for (id, stored) in items.iter() {
            if !filter.matches(&stored.metadata) {
                continue;
            }
            let token_set: HashSet<String> = stored.tf.keys().cloned().collect();
            let quality = match_quality(&terms, &token_set);
            if quality <= 0.0 {
                continue;
            }
            let len_norm = 1.0 - BM25_B + BM25_B * stored.length as f64 / avg_len;
            let raw: f64 = terms
                .iter()
                .map(|t| {
                    let tf = stored.tf.get(t).copied().unwrap_or(0) as f64;
                    idf[t.as_str()] * tf * (BM25_K1 + 1.0) / (tf + BM25_K1 * len_norm)
                })
                .sum();
            scored.push((id, stored, raw, quality));
        }

        let max_raw = scored.iter().map(|s| s.2).fold(0.0, f64::max);
        let mut hits: Vec<IndexHit> = scored
            .into_iter()
            .map(|(id, stored, raw, quality)| IndexHit {
                id: id.clone(),
                score: lexical_score(raw, max_raw, quality, terms.len()),
                raw_score: raw,
                metadata: stored.metadata.clone(),
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut items = self.items.write().map_err(poisoned)?;
        Ok(items.remove(id).is_some())
    }

    async fn fingerprints(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(ids
            .iter()
            .filter_map(|id| {
                items
                    .get(id)
                    .map(|s| (id.clone(), s.metadata.fingerprint.clone()))
            })
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(items.get(id).map(|s| s.item.clone()))
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<KnowledgeItem>> {
        let items = self.items.read().map_err(poisoned)?;
        Ok(ids
            .iter()
            .filter_map(|id| items.get(id).map(|s| s.item.clone()))
            .collect())
    }

    async fn counts(&self) -> Result<Vec<TypeSourceCount>> {
        let items = self.items.read().map_err(poisoned)?;
        let mut groups: HashMap<(crate::models::ContentType, &str), usize> = HashMap::new();
        for s in items.values() {
            *groups
                .entry((s.item.content_type, s.item.source.as_str()))
                .or_insert(0) += 1;
        }
        let mut out: Vec<TypeSourceCount> = groups
            .into_iter()
            .map(|((content_type, source), count)| TypeSourceCount {
                content_type,
                source: source.to_string(),
                count,
            })
            .collect();
        out.sort_by(|a, b| {
            a.content_type
                .cmp(&b.content_type)
                .then_with(|| a.source.cmp(&b.source))
        });
        Ok(out)
    }
}
