//! # Knowledge Harness
//!
//! A local-first hybrid knowledge index. Collectors pull records from
//! heterogeneous sources (a filesystem tree, GitHub, secret-manager project
//! metadata, container runtimes); records are normalized into
//! [`KnowledgeItem`](knowledge_harness_core::models::KnowledgeItem)s,
//! embedded, and written to both a vector index and an FTS5 lexical index
//! stored in one SQLite database. Queries run against both indexes at once
//! and their scores are fused into a single ranking.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`], [`migrate`] | SQLite pool and schema |
//! | [`sqlite_index`] | SQLite-backed vector and lexical indexes |
//! | [`embedding`] | HTTP and local embedding providers |
//! | [`collector`], [`collector_fs`], [`collector_mcp`] | Source collectors |
//! | [`ingest`] | Refresh pipeline |
//! | [`engine`] | [`KnowledgeBase`](engine::KnowledgeBase), the assembled system |
//! | [`search`], [`stats`], [`get`], [`sources`] | CLI command output |
//!
//! Domain logic (normalization, index traits, hybrid search, statistics)
//! lives in the `knowledge-harness-core` crate.

pub mod collector;
pub mod collector_fs;
pub mod collector_mcp;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod search;
pub mod sources;
pub mod sqlite_index;
pub mod stats;
