//! Filesystem collector.
//!
//! Walks a directory tree, filters paths through include/exclude globs and
//! turns each readable UTF-8 file into a record keyed by its relative path.

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use knowledge_harness_core::models::RawRecord;
use knowledge_harness_core::normalize::infer_content_type;

use crate::collector::Collector;
use crate::config::FilesystemCollectorConfig;

#[derive(Clone)]
pub struct FilesystemCollector {
    config: FilesystemCollectorConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl FilesystemCollector {
    pub fn new(config: FilesystemCollectorConfig) -> Result<Self> {
        let include = build_globset(&config.include_globs)?;

        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/target/**".to_string(),
            "**/node_modules/**".to_string(),
        ];
        default_excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&default_excludes)?;

        Ok(Self {
            config,
            include,
            exclude,
        })
    }

    fn scan(&self) -> Result<Vec<RawRecord>> {
        let root = &self.config.root;
        if !root.exists() {
            bail!("Filesystem collector root does not exist: {}", root.display());
        }

        let mut records = Vec::new();

        let walker = WalkDir::new(root).follow_links(self.config.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            match file_to_record(path, &rel_str) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(path = %rel_str, error = %e, "skipping unreadable file"),
            }
        }

        // Sort for deterministic ordering
        records.sort_by(|a, b| a.natural_key.cmp(&b.natural_key));
        records.truncate(self.config.max_items);

        Ok(records)
    }
}

#[async_trait]
impl Collector for FilesystemCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &str {
        "filesystem"
    }

    fn max_items(&self) -> usize {
        self.config.max_items
    }

    async fn collect(&self) -> Result<Vec<RawRecord>> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.scan()).await?
    }
}

fn file_to_record(path: &Path, relative_path: &str) -> Result<RawRecord> {
    let size = std::fs::metadata(path)?.len();
    let body = std::fs::read_to_string(path)?;

    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relative_path.to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let directory = Path::new(relative_path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();
    let content_type = infer_content_type(relative_path)
        .map(|ct| ct.as_str())
        .unwrap_or("file");

    let mut tags = Vec::new();
    if !extension.is_empty() {
        tags.push(extension.clone());
    }
    if let Some(dir_name) = Path::new(&directory).file_name() {
        tags.push(dir_name.to_string_lossy().to_string());
    }

    Ok(RawRecord::new(relative_path)
        .title(title)
        .content(body)
        .content_type(content_type)
        .meta("path", relative_path)
        .meta("size", size)
        .meta("extension", extension)
        .meta("directory", directory)
        .tags(tags))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
