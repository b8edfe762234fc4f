//! Configuration loading.
//!
//! The configuration lives in a single TOML file (default
//! `./config/kb.toml`). Every section except `[index]` is optional and
//! falls back to the defaults below.
//!
//! ```toml
//! [index]
//! dir = "./data"
//!
//! [embedding]
//! provider = "hash"     # hash | openai | ollama | local
//! dims = 384
//!
//! [retrieval]
//! fusion = "max"        # max | weighted | rrf
//!
//! [[collectors]]
//! kind = "filesystem"
//! name = "docs"
//! root = "./docs"
//!
//! [[collectors]]
//! kind = "github"
//! name = "github"
//! base_url = "http://localhost:12008"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use knowledge_harness_core::search::{FusionStrategy, SearchParams, MAX_LIMIT};

/// Name of the SQLite file inside `index.dir`.
pub const DB_FILE_NAME: &str = "knowledge.sqlite";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub collectors: Vec<CollectorConfig>,
}

impl Config {
    /// Config with an index directory and defaults everywhere else.
    pub fn with_index_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            index: IndexConfig { dir: dir.into() },
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            collectors: Vec::new(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.index.dir.join(DB_FILE_NAME)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the persisted indexes.
    pub dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the HTTP providers.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Attempts per embedding batch before its items are reported failed.
    #[serde(default = "default_attempts")]
    pub embed_attempts: u32,
    /// Attempts per item write before it is rolled back and reported.
    #[serde(default = "default_attempts")]
    pub write_attempts: u32,
    /// Base delay for exponential backoff between attempts.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_collector_timeout_secs")]
    pub collector_timeout_secs: u64,
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,
    #[serde(default = "default_max_parallel_sources")]
    pub max_parallel_sources: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            embed_attempts: default_attempts(),
            write_attempts: default_attempts(),
            retry_base_ms: default_retry_base_ms(),
            collector_timeout_secs: default_collector_timeout_secs(),
            index_timeout_secs: default_index_timeout_secs(),
            max_parallel_sources: default_max_parallel_sources(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    200
}
fn default_collector_timeout_secs() -> u64 {
    60
}
fn default_index_timeout_secs() -> u64 {
    10
}
fn default_max_parallel_sources() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// `max`, `weighted` or `rrf`.
    #[serde(default = "default_fusion")]
    pub fusion: String,
    /// Vector weight for `weighted` fusion.
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Rank constant for `rrf` fusion.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Per-query deadline covering both index paths.
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            candidate_multiplier: default_candidate_multiplier(),
            fusion: default_fusion(),
            hybrid_alpha: default_hybrid_alpha(),
            rrf_k: default_rrf_k(),
            search_timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_limit() -> usize {
    10
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_fusion() -> String {
    "max".to_string()
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_search_timeout_secs() -> u64 {
    30
}

impl RetrievalConfig {
    pub fn fusion_strategy(&self) -> Result<FusionStrategy> {
        match self.fusion.as_str() {
            "max" => Ok(FusionStrategy::Max),
            "weighted" => Ok(FusionStrategy::Weighted {
                alpha: self.hybrid_alpha,
            }),
            "rrf" => Ok(FusionStrategy::Rrf { k: self.rrf_k }),
            other => bail!(
                "Unknown fusion strategy: '{}'. Must be max, weighted, or rrf.",
                other
            ),
        }
    }

    pub fn search_params(&self) -> Result<SearchParams> {
        Ok(SearchParams {
            candidate_multiplier: self.candidate_multiplier,
            fusion: self.fusion_strategy()?,
        })
    }
}

/// One `[[collectors]]` entry, tagged by `kind`.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CollectorConfig {
    Filesystem(FilesystemCollectorConfig),
    Github(McpCollectorConfig),
    Secrets(McpCollectorConfig),
    Containers(McpCollectorConfig),
}

impl CollectorConfig {
    pub fn name(&self) -> &str {
        match self {
            CollectorConfig::Filesystem(c) => &c.name,
            CollectorConfig::Github(c)
            | CollectorConfig::Secrets(c)
            | CollectorConfig::Containers(c) => &c.name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CollectorConfig::Filesystem(_) => "filesystem",
            CollectorConfig::Github(_) => "github",
            CollectorConfig::Secrets(_) => "secrets",
            CollectorConfig::Containers(_) => "containers",
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            CollectorConfig::Filesystem(c) => c.enabled,
            CollectorConfig::Github(c)
            | CollectorConfig::Secrets(c)
            | CollectorConfig::Containers(c) => c.enabled,
        }
    }

    pub fn max_items(&self) -> usize {
        match self {
            CollectorConfig::Filesystem(c) => c.max_items,
            CollectorConfig::Github(c)
            | CollectorConfig::Secrets(c)
            | CollectorConfig::Containers(c) => c.max_items,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemCollectorConfig {
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_fs_max_items")]
    pub max_items: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_include_globs() -> Vec<String> {
    ["md", "txt", "rst", "py", "js", "ts", "rs", "json", "yml", "yaml", "toml"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}
fn default_fs_max_items() -> usize {
    100
}
fn default_true() -> bool {
    true
}

/// Collector that calls an MCP gateway at `{base_url}/mcp/{server}/{method}`.
#[derive(Debug, Deserialize, Clone)]
pub struct McpCollectorConfig {
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Gateway server name; defaults per kind (`github`, `infisical`, `docker`).
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default = "default_mcp_max_items")]
    pub max_items: usize,
    #[serde(default = "default_issue_limit")]
    pub issue_limit: usize,
    #[serde(default = "default_commit_limit")]
    pub commit_limit: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_base_url() -> String {
    "http://localhost:12008".to_string()
}
fn default_mcp_max_items() -> usize {
    1000
}
fn default_issue_limit() -> usize {
    10
}
fn default_commit_limit() -> usize {
    20
}
fn default_request_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints serde cannot express.
pub fn validate(config: &Config) -> Result<()> {
    if config.index.dir.as_os_str().is_empty() {
        bail!("index.dir must not be empty");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "hash" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.dims.is_none() {
            bail!(
                "embedding.dims must be set when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    // Ingest
    if config.ingest.embed_attempts == 0 || config.ingest.write_attempts == 0 {
        bail!("ingest.embed_attempts and ingest.write_attempts must be >= 1");
    }
    if config.ingest.max_parallel_sources == 0 {
        bail!("ingest.max_parallel_sources must be >= 1");
    }
    if config.ingest.collector_timeout_secs == 0 || config.ingest.index_timeout_secs == 0 {
        bail!("ingest timeouts must be > 0");
    }

    // Retrieval
    if !(1..=MAX_LIMIT).contains(&config.retrieval.default_limit) {
        bail!("retrieval.default_limit must be in [1, {}]", MAX_LIMIT);
    }
    if config.retrieval.candidate_multiplier == 0 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if config.retrieval.rrf_k < 0.0 {
        bail!("retrieval.rrf_k must be >= 0");
    }
    config.retrieval.fusion_strategy()?;

    // Collectors
    let mut names = HashSet::new();
    for collector in &config.collectors {
        let name = collector.name();
        if name.trim().is_empty() {
            bail!("collector of kind '{}' has an empty name", collector.kind());
        }
        if !names.insert(name.to_string()) {
            bail!("duplicate collector name: '{}'", name);
        }
        if collector.max_items() == 0 {
            bail!("collector '{}': max_items must be > 0", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse("[index]\ndir = \"./data\"\n").unwrap();
        assert_eq!(cfg.embedding.provider, "hash");
        assert_eq!(cfg.ingest.write_attempts, 3);
        assert_eq!(cfg.retrieval.default_limit, 10);
        assert_eq!(cfg.retrieval.fusion_strategy().unwrap(), FusionStrategy::Max);
        assert!(cfg.collectors.is_empty());
        assert_eq!(cfg.db_path(), PathBuf::from("./data").join(DB_FILE_NAME));
    }

    #[test]
    fn test_collectors_are_tagged_by_kind() {
        let cfg = parse(
            r#"
[index]
dir = "./data"

[[collectors]]
kind = "filesystem"
name = "docs"
root = "./docs"

[[collectors]]
kind = "github"
name = "gh"
issue_limit = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.collectors.len(), 2);
        assert_eq!(cfg.collectors[0].kind(), "filesystem");
        assert_eq!(cfg.collectors[0].max_items(), 100);
        match &cfg.collectors[1] {
            CollectorConfig::Github(c) => {
                assert_eq!(c.base_url, "http://localhost:12008");
                assert_eq!(c.issue_limit, 5);
                assert_eq!(c.commit_limit, 20);
            }
            other => panic!("unexpected collector: {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_collector_names_rejected() {
        let err = parse(
            r#"
[index]
dir = "./data"

[[collectors]]
kind = "secrets"
name = "dup"

[[collectors]]
kind = "containers"
name = "dup"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate collector name"));
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!(parse("[index]\ndir = \"d\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse("[index]\ndir = \"d\"\n[retrieval]\nfusion = \"avg\"\n").is_err());
        assert!(parse("[index]\ndir = \"d\"\n[retrieval]\nhybrid_alpha = 1.5\n").is_err());
        assert!(parse("[index]\ndir = \"d\"\n[embedding]\nprovider = \"openai\"\n").is_err());
    }

    #[test]
    fn test_weighted_fusion_reads_alpha() {
        let cfg = parse(
            "[index]\ndir = \"d\"\n[retrieval]\nfusion = \"weighted\"\nhybrid_alpha = 0.3\n",
        )
        .unwrap();
        assert_eq!(
            cfg.retrieval.fusion_strategy().unwrap(),
            FusionStrategy::Weighted { alpha: 0.3 }
        );
    }
}
