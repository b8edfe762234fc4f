//! Item normalization: raw collector records into [`KnowledgeItem`]s.
//!
//! Normalization is pure. The id is derived from `(source, natural_key)`
//! so re-ingesting the same record always lands on the same id, and the
//! fingerprint is derived from the indexed fields so both indexes can
//! agree on which version of an item they hold.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::KnowledgeError;
use crate::models::{ContentType, ItemFailure, KnowledgeItem, RawRecord};

/// Content longer than this many characters is truncated.
pub const MAX_CONTENT_CHARS: usize = 10_000;
/// Appended to truncated content.
pub const TRUNCATION_MARKER: &str = "...[truncated]";
/// Titles are capped at this many characters.
pub const MAX_TITLE_CHARS: usize = 200;

const DOC_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "rst", "adoc"];
const CONFIG_EXTENSIONS: &[&str] = &["json", "yml", "yaml", "toml", "ini", "cfg", "conf", "env"];
const CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "kt", "scala", "c", "h", "cc", "cpp",
    "hpp", "cs", "rb", "php", "swift", "sh", "bash", "zsh", "ps1", "sql", "lua", "ex", "exs",
];

/// Deterministic item id: hex of the first 16 bytes of
/// `SHA-256(source \0 natural_key)`.
pub fn item_id(source: &str, natural_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(natural_key.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Version stamp over the indexed fields of an item.
pub fn fingerprint(source: &str, content_type: ContentType, title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [source, content_type.as_str(), title, content] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Guess a content type from a file-like key's extension.
pub fn infer_content_type(key: &str) -> Option<ContentType> {
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    if DOC_EXTENSIONS.contains(&ext.as_str()) {
        Some(ContentType::Documentation)
    } else if CONFIG_EXTENSIONS.contains(&ext.as_str()) {
        Some(ContentType::Configuration)
    } else if CODE_EXTENSIONS.contains(&ext.as_str()) {
        Some(ContentType::Code)
    } else {
        None
    }
}

/// Cut `content` to [`MAX_CONTENT_CHARS`] characters, appending
/// [`TRUNCATION_MARKER`] when anything was dropped.
pub fn truncate_content(content: &str) -> String {
    match content.char_indices().nth(MAX_CONTENT_CHARS) {
        Some((byte_idx, _)) => {
            let mut out = String::with_capacity(byte_idx + TRUNCATION_MARKER.len());
            out.push_str(&content[..byte_idx]);
            out.push_str(TRUNCATION_MARKER);
            out
        }
        None => content.to_string(),
    }
}

fn clean_title(title: &str) -> String {
    title.trim().chars().take(MAX_TITLE_CHARS).collect()
}

/// Lowercase, trim, drop empties, dedupe, sort.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Normalize a single record from `source`.
///
/// `now` becomes both `created_at` and `updated_at`; indexes keep the
/// original `created_at` when the id already exists.
pub fn normalize(
    record: RawRecord,
    source: &str,
    now: DateTime<Utc>,
) -> Result<KnowledgeItem, KnowledgeError> {
    let key = record.natural_key.trim();
    if key.is_empty() {
        return Err(KnowledgeError::MalformedItem(format!(
            "record from '{}' has no natural key",
            source
        )));
    }

    let title = record.title.as_deref().map(clean_title).unwrap_or_default();
    if title.is_empty() {
        return Err(KnowledgeError::MalformedItem(format!(
            "'{}' has no title",
            key
        )));
    }

    let content = match record.content.as_deref() {
        Some(c) if !c.trim().is_empty() => truncate_content(c),
        _ => {
            return Err(KnowledgeError::MalformedItem(format!(
                "'{}' has no content",
                key
            )))
        }
    };

    let content_type = match record.content_type.as_deref() {
        Some(hint) => hint
            .parse::<ContentType>()
            .map_err(|e| KnowledgeError::MalformedItem(format!("'{}': {}", key, e)))?,
        None => infer_content_type(key).unwrap_or(ContentType::Note),
    };

    Ok(KnowledgeItem {
        id: item_id(source, key),
        title,
        content,
        content_type,
        source: source.to_string(),
        metadata: record.metadata,
        tags: normalize_tags(&record.tags),
        created_at: now,
        updated_at: now,
    })
}

/// Normalize every record of one source.
///
/// When two records map to the same id the later one wins, keeping the
/// position of the first. Malformed records become [`ItemFailure`]s.
pub fn normalize_batch(
    records: Vec<RawRecord>,
    source: &str,
    now: DateTime<Utc>,
) -> (Vec<KnowledgeItem>, Vec<ItemFailure>) {
    let mut items: Vec<KnowledgeItem> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut failures = Vec::new();

    for record in records {
        let key = record.natural_key.clone();
        match normalize(record, source, now) {
            Ok(item) => match positions.get(&item.id) {
                Some(&pos) => {
                    tracing::debug!(source, key = %key, "duplicate record, keeping the latest");
                    items[pos] = item;
                }
                None => {
                    positions.insert(item.id.clone(), items.len());
                    items.push(item);
                }
            },
            Err(err) => {
                tracing::warn!(source, key = %key, error = %err, "skipping record");
                failures.push(ItemFailure {
                    source: source.to_string(),
                    key,
                    kind: err.kind().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    (items, failures)
}
