//! Index statistics.
//!
//! Counts come from the lexical store, which holds every committed item's
//! metadata. The vector count is only used as a consistency check.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::index::{LexicalIndex, TypeSourceCount, VectorIndex};

/// Aggregate counts over everything currently indexed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub total_items: usize,
    pub counts_by_type: BTreeMap<String, usize>,
    pub counts_by_source: BTreeMap<String, usize>,
    /// One row per `(content_type, source)` pair, sorted by both.
    pub counts_by_type_and_source: Vec<TypeSourceCount>,
    pub vector_count: usize,
    /// False when the two indexes disagree on how many items they hold.
    pub consistent: bool,
}

/// Compute statistics from both indexes. A count mismatch is logged and
/// reported through [`Statistics::consistent`], never raised.
pub async fn statistics(
    lexical: &dyn LexicalIndex,
    vector: &dyn VectorIndex,
) -> Result<Statistics> {
    let mut counts = lexical.counts().await?;
    counts.sort_by(|a, b| {
        a.content_type
            .cmp(&b.content_type)
            .then_with(|| a.source.cmp(&b.source))
    });
    let vector_count = vector.count().await?;

    let mut stats = Statistics {
        vector_count,
        ..Default::default()
    };
    for row in &counts {
        stats.total_items += row.count;
        *stats
            .counts_by_type
            .entry(row.content_type.to_string())
            .or_insert(0) += row.count;
        *stats
            .counts_by_source
            .entry(row.source.clone())
            .or_insert(0) += row.count;
    }
    stats.counts_by_type_and_source = counts;

    stats.consistent = stats.total_items == vector_count;
    if !stats.consistent {
        tracing::warn!(
            lexical = stats.total_items,
            vector = vector_count,
            "index counts disagree; a refresh should reconcile them"
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::memory::{InMemoryLexicalIndex, InMemoryVectorIndex};
    use crate::index::VectorEntry;
    use crate::models::RawRecord;
    use crate::normalize::normalize;
    use chrono::Utc;

    #[tokio::test]
    async fn test_empty_indexes() {
        let stats = statistics(&InMemoryLexicalIndex::new(), &InMemoryVectorIndex::new())
            .await
            .unwrap();
        assert_eq!(stats.total_items, 0);
        assert!(stats.consistent);
        assert!(stats.counts_by_type.is_empty());
    }

    #[tokio::test]
    async fn test_counts_by_type_and_source() {
        let lexical = InMemoryLexicalIndex::new();
        let vector = InMemoryVectorIndex::new();
        let records = [
            ("github", "repo-1", "repository"),
            ("github", "issue-7", "issue"),
            ("github", "issue-8", "issue"),
            ("docs", "guide.md", "documentation"),
        ];
        for (source, key, ct) in records {
            let it = normalize(
                RawRecord::new(key).title(key).content("body").content_type(ct),
                source,
                Utc::now(),
            )
            .unwrap();
            lexical.upsert(&it).await.unwrap();
            vector
                .upsert(VectorEntry {
                    id: it.id.clone(),
                    vector: vec![1.0, 0.0],
                    metadata: it.index_metadata(),
                })
                .await
                .unwrap();
        }

        let stats = statistics(&lexical, &vector).await.unwrap();
        assert_eq!(stats.total_items, 4);
        assert_eq!(stats.counts_by_type["issue"], 2);
        assert_eq!(stats.counts_by_source["github"], 3);
        let rows: Vec<(&str, &str, usize)> = stats
            .counts_by_type_and_source
            .iter()
            .map(|r| (r.content_type.as_str(), r.source.as_str(), r.count))
            .collect();
        assert!(rows.contains(&("issue", "github", 2)));
        assert!(rows.contains(&("repository", "github", 1)));
        assert!(rows.contains(&("documentation", "docs", 1)));
        assert_eq!(rows.len(), 3);
        assert!(stats.consistent);
    }

    #[tokio::test]
    async fn test_mismatch_is_reported_not_raised() {
        let lexical = InMemoryLexicalIndex::new();
        let it = normalize(
            RawRecord::new("k").title("t").content("c"),
            "s",
            Utc::now(),
        )
        .unwrap();
        lexical.upsert(&it).await.unwrap();
        let stats = statistics(&lexical, &InMemoryVectorIndex::new())
            .await
            .unwrap();
        assert_eq!(stats.total_items, 1);
        assert_eq!(stats.vector_count, 0);
        assert!(!stats.consistent);
    }
}
