use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kb");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt contains information about cargo and crates.",
    ).unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta Document\n\nThis document discusses Python and machine learning.\n\nDeep learning frameworks like PyTorch are covered.",
    ).unwrap();
    fs::write(
        files_dir.join("gamma.txt"),
        "Gamma plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    ).unwrap();

    let config_content = format!(
        r#"[index]
dir = "{root}/data"

[retrieval]
default_limit = 12

[[collectors]]
kind = "filesystem"
name = "docs"
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("kb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn refreshed_env() -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let (stdout, stderr, success) = run_kb(&config_path, &["refresh"]);
    assert!(success, "refresh failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

fn search_json(config_path: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["search"];
    full.extend_from_slice(args);
    full.push("--json");
    let (stdout, stderr, success) = run_kb(config_path, &full);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap()
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kb(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/knowledge.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_kb(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_kb(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_refresh_filesystem() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kb(&config_path, &["refresh"]);
    assert!(success, "refresh failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("items indexed: 3"), "got: {}", stdout);
    assert!(stdout.contains("sources failed: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_refresh_twice_no_duplicates() {
    let (_tmp, config_path) = refreshed_env();

    let (stdout, _, success) = run_kb(&config_path, &["refresh", "--json"]);
    assert!(success);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["items_collected"], 3);
    assert_eq!(summary["embeddings_reused"], 3);

    let (stdout, _, _) = run_kb(&config_path, &["stats", "--json"]);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["total_items"], 3);
}

#[test]
fn test_refresh_with_missing_root_reports_failure() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("files")).unwrap();

    let (stdout, stderr, success) = run_kb(&config_path, &["refresh", "--json"]);
    assert!(success, "refresh must not fail as a whole: {}", stderr);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["sources_failed"], 1);
    assert_eq!(summary["items_failed"], 1);
    assert_eq!(summary["items_collected"], 0);
}

#[test]
fn test_search_keyword() {
    let (_tmp, config_path) = refreshed_env();

    let (stdout, _, success) = run_kb(&config_path, &["search", "Rust programming"]);
    assert!(success, "search failed");
    assert!(
        stdout.contains("alpha.md"),
        "Expected alpha.md in results, got: {}",
        stdout
    );
}

#[test]
fn test_search_json_shape() {
    let (_tmp, config_path) = refreshed_env();

    let response = search_json(&config_path, &["kubernetes docker"]);
    let results = response["results"].as_array().unwrap();
    assert!(!results.is_empty());
    let top = &results[0];
    assert_eq!(top["item"]["title"], "gamma.txt");
    assert_eq!(top["item"]["source"], "docs");
    assert_eq!(top["item"]["content_type"], "documentation");
    let score = top["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
    assert!(top["highlight"].as_str().unwrap().contains("**"));
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = refreshed_env();

    let (stdout1, _, _) = run_kb(&config_path, &["search", "document"]);
    let (stdout2, _, _) = run_kb(&config_path, &["search", "document"]);
    let strip = |s: &str| {
        s.lines()
            .filter(|l| !l.contains(" ms"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(strip(&stdout1), strip(&stdout2));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = refreshed_env();

    let (stdout, _, success) = run_kb(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_unknown_type_fails() {
    let (_tmp, config_path) = refreshed_env();

    let (_, stderr, success) = run_kb(&config_path, &["search", "rust", "--type", "podcast"]);
    assert!(!success);
    assert!(stderr.contains("invalid filter"), "stderr: {}", stderr);
}

#[test]
fn test_search_source_filter() {
    let (_tmp, config_path) = refreshed_env();

    let response = search_json(&config_path, &["document", "--source", "elsewhere"]);
    assert!(response["results"].as_array().unwrap().is_empty());

    let response = search_json(&config_path, &["document", "--source", "docs"]);
    assert!(!response["results"].as_array().unwrap().is_empty());
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = refreshed_env();

    let (stdout, _, success) = run_kb(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Items:       3"), "got: {}", stdout);

    let (stdout, _, _) = run_kb(&config_path, &["stats", "--json"]);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["counts_by_source"]["docs"], 3);
    assert_eq!(stats["counts_by_type"]["documentation"], 3);
    assert_eq!(stats["consistent"], true);
    let rows = stats["counts_by_type_and_source"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["content_type"], "documentation");
    assert_eq!(rows[0]["source"], "docs");
    assert_eq!(rows[0]["count"], 3);
    assert_eq!(stats["last_refresh"]["items_collected"], 3);
}

#[test]
fn test_get_and_delete() {
    let (_tmp, config_path) = refreshed_env();

    let response = search_json(&config_path, &["alpha"]);
    let id = response["results"][0]["item"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let (stdout, _, success) = run_kb(&config_path, &["get", &id]);
    assert!(success);
    assert!(stdout.contains("--- Item ---"));
    assert!(stdout.contains("Rust programming"));

    let (stdout, _, success) = run_kb(&config_path, &["delete", &id]);
    assert!(success);
    assert!(stdout.contains("deleted"));

    let (_, stderr, success) = run_kb(&config_path, &["get", &id]);
    assert!(!success);
    assert!(stderr.contains("not found"));
}

#[test]
fn test_sources_lists_collectors() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_kb(&config_path, &["sources"]);
    assert!(success);
    assert!(stdout.contains("docs"));
    assert!(stdout.contains("filesystem"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_kb(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
