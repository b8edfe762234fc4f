//! The source collector seam.
//!
//! A [`Collector`] pulls raw records from one knowledge source. The
//! ingestion pipeline runs every configured collector, normalizes what
//! they return, and indexes the result.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use knowledge_harness_core::models::RawRecord;

use crate::collector_fs::FilesystemCollector;
use crate::collector_mcp::{McpCollector, McpKind};
use crate::config::{CollectorConfig, Config};

/// A knowledge source that produces raw records for ingestion.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use knowledge_harness::collector::Collector;
/// use knowledge_harness_core::models::RawRecord;
///
/// pub struct RunbookCollector;
///
/// #[async_trait]
/// impl Collector for RunbookCollector {
///     fn name(&self) -> &str { "runbooks" }
///     fn kind(&self) -> &str { "custom" }
///
///     async fn collect(&self) -> Result<Vec<RawRecord>> {
///         Ok(vec![RawRecord::new("deploy")
///             .title("Deploy runbook")
///             .content("Roll out with the canary first.")])
///     }
/// }
/// ```
#[async_trait]
pub trait Collector: Send + Sync {
    /// Source label stamped on every item (e.g. `"docs"`, `"github"`).
    fn name(&self) -> &str;

    /// Collector kind (e.g. `"filesystem"`, `"github"`).
    fn kind(&self) -> &str;

    /// Upper bound on records taken from one collection run.
    fn max_items(&self) -> usize {
        usize::MAX
    }

    /// Collect every record currently available from the source.
    ///
    /// An error fails the whole source for this refresh; other sources
    /// are unaffected.
    async fn collect(&self) -> Result<Vec<RawRecord>>;
}

/// Instantiate every enabled collector in config order.
pub fn build_collectors(config: &Config) -> Result<Vec<Arc<dyn Collector>>> {
    let mut out: Vec<Arc<dyn Collector>> = Vec::new();
    for entry in config.collectors.iter().filter(|c| c.enabled()) {
        let collector: Arc<dyn Collector> = match entry {
            CollectorConfig::Filesystem(c) => Arc::new(FilesystemCollector::new(c.clone())?),
            CollectorConfig::Github(c) => Arc::new(McpCollector::new(c.clone(), McpKind::Github)?),
            CollectorConfig::Secrets(c) => {
                Arc::new(McpCollector::new(c.clone(), McpKind::Secrets)?)
            }
            CollectorConfig::Containers(c) => {
                Arc::new(McpCollector::new(c.clone(), McpKind::Containers)?)
            }
        };
        out.push(collector);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_collectors_skipped() {
        let config: Config = toml::from_str(
            r#"
[index]
dir = "./data"

[[collectors]]
kind = "filesystem"
name = "docs"
root = "./docs"

[[collectors]]
kind = "containers"
name = "docker"
enabled = false

[[collectors]]
kind = "github"
name = "gh"
"#,
        )
        .unwrap();
        let collectors = build_collectors(&config).unwrap();
        let names: Vec<_> = collectors.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["docs", "gh"]);
        assert_eq!(collectors[0].kind(), "filesystem");
        assert_eq!(collectors[1].kind(), "github");
        assert_eq!(collectors[1].max_items(), 1000);
    }
}
