//! `kb stats`: index statistics and health overview.

use anyhow::Result;
use serde::Serialize;

use knowledge_harness_core::stats::Statistics;

use crate::config::Config;
use crate::engine::{KnowledgeBase, RefreshRun};

#[derive(Serialize)]
struct StatsReport<'a> {
    database: String,
    size_bytes: u64,
    #[serde(flatten)]
    stats: &'a Statistics,
    last_refresh: Option<RefreshRun>,
}

pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let stats = kb.statistics().await;
    let last_refresh = kb.last_refresh().await;
    kb.close().await;
    let stats = stats?;
    let last_refresh = last_refresh?;

    let db_path = config.db_path();
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    if json {
        let report = StatsReport {
            database: db_path.display().to_string(),
            size_bytes: db_size,
            stats: &stats,
            last_refresh,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Knowledge Harness - Index Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Items:       {}", stats.total_items);
    println!("  Vectors:     {}", stats.vector_count);
    if !stats.consistent {
        println!("  Warning:     index counts disagree, run `kb refresh`");
    }
    match &last_refresh {
        Some(run) => println!(
            "  Last refresh: {} ({} indexed, {} failed)",
            format_ts_relative(run.started_at.timestamp()),
            run.items_collected,
            run.items_failed
        ),
        None => println!("  Last refresh: never"),
    }

    if !stats.counts_by_type.is_empty() {
        println!();
        println!("  By type:");
        for (content_type, count) in &stats.counts_by_type {
            println!("    {:<20} {:>6}", content_type, count);
        }
    }

    if !stats.counts_by_source.is_empty() {
        println!();
        println!("  By source:");
        for (source, count) in &stats.counts_by_source {
            println!("    {:<20} {:>6}", source, count);
        }
    }

    if !stats.counts_by_type_and_source.is_empty() {
        println!();
        println!("  By type and source:");
        for row in &stats.counts_by_type_and_source {
            println!(
                "    {:<16} {:<20} {:>6}",
                row.content_type.as_str(),
                row.source,
                row.count
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
