//! Collectors backed by an MCP gateway.
//!
//! Each call is `POST {base_url}/mcp/{server}/{method}` with a JSON object
//! of parameters. The top-level listing call (repositories, projects,
//! containers) must succeed or the whole collection fails; per-entity
//! calls (issues, commits, images) are logged and skipped on failure.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use knowledge_harness_core::models::RawRecord;

use crate::collector::Collector;
use crate::config::McpCollectorConfig;

/// Which family of MCP tools a collector reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpKind {
    /// Repositories, issues and commits.
    Github,
    /// Secret-manager project metadata. Never secret values.
    Secrets,
    /// Containers and images.
    Containers,
}

impl McpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpKind::Github => "github",
            McpKind::Secrets => "secrets",
            McpKind::Containers => "containers",
        }
    }

    fn default_server(&self) -> &'static str {
        match self {
            McpKind::Github => "github",
            McpKind::Secrets => "infisical",
            McpKind::Containers => "docker",
        }
    }
}

pub struct McpCollector {
    config: McpCollectorConfig,
    kind: McpKind,
    client: reqwest::Client,
}

impl McpCollector {
    pub fn new(config: McpCollectorConfig, kind: McpKind) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            config,
            kind,
            client,
        })
    }

    fn server(&self) -> &str {
        self.config
            .server
            .as_deref()
            .unwrap_or_else(|| self.kind.default_server())
    }

    /// Call one MCP method.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let url = format!(
            "{}/mcp/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.server(),
            method
        );
        let response = self
            .client
            .post(&url)
            .json(&params)
            .send()
            .await
            .with_context(|| format!("MCP call {}/{} failed", self.server(), method))?;
        let status = response.status();
        if !status.is_success() {
            bail!("MCP call {}/{} returned HTTP {}", self.server(), method, status);
        }
        response.json().await.with_context(|| {
            format!("MCP call {}/{} returned invalid JSON", self.server(), method)
        })
    }

    /// Call a per-entity method whose failure only loses that detail.
    async fn call_tolerant(&self, method: &str, params: Value) -> Value {
        match self.call(method, params).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    server = self.server(),
                    method,
                    error = %format!("{:#}", e),
                    "MCP call failed, skipping"
                );
                json!({})
            }
        }
    }

    async fn collect_github(&self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        let repos = self.call("list_repositories", json!({})).await?;

        for repo in array(&repos, "repositories") {
            let name = text(repo, "name");
            records.push(repo_record(repo));

            let issues = self.call_tolerant("list_issues", json!({ "repo": name })).await;
            for issue in array(&issues, "issues").iter().take(self.config.issue_limit) {
                records.push(issue_record(issue, &name));
            }

            let commits = self
                .call_tolerant(
                    "list_commits",
                    json!({ "repo": name, "limit": self.config.commit_limit }),
                )
                .await;
            for commit in array(&commits, "commits").iter().take(self.config.commit_limit) {
                records.push(commit_record(commit, &name));
            }
        }
        Ok(records)
    }

    async fn collect_secrets(&self) -> Result<Vec<RawRecord>> {
        let projects = self.call("list_projects", json!({})).await?;
        Ok(array(&projects, "projects")
            .iter()
            .map(project_record)
            .collect())
    }

    async fn collect_containers(&self) -> Result<Vec<RawRecord>> {
        let containers = self.call("list_containers", json!({})).await?;
        let images = self.call_tolerant("list_images", json!({})).await;
        Ok(array(&containers, "containers")
            .iter()
            .map(container_record)
            .chain(array(&images, "images").iter().map(image_record))
            .collect())
    }
}

#[async_trait]
impl Collector for McpCollector {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn kind(&self) -> &str {
        self.kind.as_str()
    }

    fn max_items(&self) -> usize {
        self.config.max_items
    }

    async fn collect(&self) -> Result<Vec<RawRecord>> {
        let mut records = match self.kind {
            McpKind::Github => self.collect_github().await?,
            McpKind::Secrets => self.collect_secrets().await?,
            McpKind::Containers => self.collect_containers().await?,
        };
        records.truncate(self.config.max_items);
        tracing::debug!(collector = %self.config.name, count = records.len(), "collected");
        Ok(records)
    }
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// String form of a scalar field. Numbers are rendered, null is empty.
fn text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn strings(value: &Value, key: &str) -> Vec<String> {
    array(value, key)
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn field(value: &Value, key: &str) -> Value {
    value.get(key).cloned().unwrap_or(Value::Null)
}

fn repo_record(repo: &Value) -> RawRecord {
    let language = text(repo, "language");
    let mut tags = strings(repo, "topics");
    tags.push(language.to_lowercase());

    RawRecord::new(format!("repo/{}", text(repo, "id")))
        .title(text(repo, "name"))
        .content(format!(
            "{}\n{}",
            text(repo, "description"),
            text(repo, "readme")
        ))
        .content_type("repository")
        .meta("url", text(repo, "html_url"))
        .meta("language", field(repo, "language"))
        .meta("stars", repo.get("stargazers_count").cloned().unwrap_or(json!(0)))
        .meta("forks", repo.get("forks_count").cloned().unwrap_or(json!(0)))
        .meta("topics", json!(strings(repo, "topics")))
        .tags(tags)
}

fn issue_record(issue: &Value, repo: &str) -> RawRecord {
    let labels: Vec<String> = array(issue, "labels")
        .iter()
        .map(|l| text(l, "name"))
        .filter(|l| !l.is_empty())
        .collect();
    let state = text(issue, "state");

    RawRecord::new(format!("issue/{}", text(issue, "id")))
        .title(text(issue, "title"))
        .content(text(issue, "body"))
        .content_type("issue")
        .meta("repo", repo)
        .meta("number", field(issue, "number"))
        .meta("state", state.clone())
        .meta("url", text(issue, "html_url"))
        .meta("labels", json!(labels))
        .tags(std::iter::once(state).chain(labels))
}

fn commit_record(commit: &Value, repo: &str) -> RawRecord {
    let sha = text(commit, "sha");
    let inner = commit.get("commit").cloned().unwrap_or(Value::Null);
    let message = text(&inner, "message");
    let author = inner
        .get("author")
        .map(|a| text(a, "name"))
        .unwrap_or_default();
    let title = message.lines().next().unwrap_or_default().to_string();

    RawRecord::new(format!("commit/{}", sha))
        .title(title)
        .content(message)
        .content_type("commit")
        .meta("repo", repo)
        .meta("sha", sha.clone())
        .meta("author", author)
        .meta("url", text(commit, "html_url"))
        .meta("files_changed", array(commit, "files").len())
        .tags(["commit".to_string(), repo.to_lowercase()])
}

fn project_record(project: &Value) -> RawRecord {
    let name = text(project, "name");
    let environments = strings(project, "environments");

    RawRecord::new(format!("project/{}", text(project, "id")))
        .title(format!("Infisical Project: {}", name))
        .content(format!(
            "Project: {}\nEnvironments: {}",
            name,
            environments.join(", ")
        ))
        .content_type("secret_metadata")
        .meta("project_id", field(project, "id"))
        .meta("environments", json!(environments))
        .meta(
            "secret_count",
            project.get("secret_count").cloned().unwrap_or(json!(0)),
        )
        .tags(
            ["secrets".to_string(), "infisical".to_string()]
                .into_iter()
                .chain(environments),
        )
}

fn container_record(container: &Value) -> RawRecord {
    let id = text(container, "id");
    let status = text(container, "status");

    RawRecord::new(format!("container/{}", short_id(&id)))
        .title(format!("Container: {}", text(container, "name")))
        .content(format!(
            "Image: {}\nStatus: {}\nPorts: {}",
            text(container, "image"),
            status,
            text(container, "ports")
        ))
        .content_type("configuration")
        .meta("container_id", id.clone())
        .meta("image", text(container, "image"))
        .meta("status", status.clone())
        .meta("ports", container.get("ports").cloned().unwrap_or(json!([])))
        .meta("labels", container.get("labels").cloned().unwrap_or(json!({})))
        .tags([
            "docker".to_string(),
            "container".to_string(),
            status.to_lowercase(),
        ])
}

fn image_record(image: &Value) -> RawRecord {
    let id = text(image, "id");
    let repository = text(image, "repository");
    let tag = text(image, "tag");
    let size = match image.get("size") {
        Some(v) if !v.is_null() => text(image, "size"),
        _ => "Unknown".to_string(),
    };

    RawRecord::new(format!("image/{}", short_id(&id)))
        .title(format!("Image: {}:{}", repository, tag))
        .content(format!(
            "Repository: {}\nTag: {}\nSize: {}",
            repository, tag, size
        ))
        .content_type("configuration")
        .meta("image_id", id.clone())
        .meta("repository", repository.clone())
        .meta("tag", tag)
        .meta("size", image.get("size").cloned().unwrap_or(json!(0)))
        .tags([
            "docker".to_string(),
            "image".to_string(),
            repository.to_lowercase(),
        ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates_to_twelve_chars() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_commit_title_is_first_line() {
        let commit = json!({
            "sha": "deadbeef",
            "html_url": "https://example.test/c/deadbeef",
            "files": [{}, {}],
            "commit": {"message": "Fix retry\n\nLonger body", "author": {"name": "sam"}}
        });
        let record = commit_record(&commit, "Queue");
        assert_eq!(record.natural_key, "commit/deadbeef");
        assert_eq!(record.title.as_deref(), Some("Fix retry"));
        assert_eq!(record.metadata["files_changed"], 2);
        assert_eq!(record.tags, vec!["commit", "queue"]);
    }

    #[test]
    fn test_image_without_size_reads_unknown() {
        let image = json!({"id": "sha256abcdef0123", "repository": "Redis", "tag": "7"});
        let record = image_record(&image);
        assert_eq!(record.title.as_deref(), Some("Image: Redis:7"));
        assert!(record.content.unwrap().ends_with("Size: Unknown"));
        assert_eq!(record.natural_key, "image/sha256abcdef");
    }

    #[test]
    fn test_project_record_never_carries_values() {
        let project = json!({
            "id": 7,
            "name": "api",
            "environments": ["dev", "prod"],
            "secret_count": 4
        });
        let record = project_record(&project);
        assert_eq!(record.natural_key, "project/7");
        assert_eq!(record.content.as_deref(), Some("Project: api\nEnvironments: dev, prod"));
        assert_eq!(record.tags, vec!["secrets", "infisical", "dev", "prod"]);
    }
}
