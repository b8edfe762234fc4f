//! `kb search`: run a hybrid query and print ranked results.

use anyhow::Result;

use knowledge_harness_core::models::{RetrievalPath, SearchResponse};
use knowledge_harness_core::search::SearchRequest;

use crate::config::Config;
use crate::engine::{parse_content_types, KnowledgeBase};

/// Filters accepted on the command line.
#[derive(Debug, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub types: Vec<String>,
    pub sources: Vec<String>,
    pub tags: Vec<String>,
}

pub async fn run_search(
    config: &Config,
    query: &str,
    opts: SearchOptions,
    json: bool,
) -> Result<()> {
    let request = SearchRequest {
        query: query.to_string(),
        limit: opts.limit.unwrap_or(config.retrieval.default_limit),
        content_types: parse_content_types(&opts.types)?,
        sources: opts.sources,
        tags: opts.tags,
    };

    let kb = KnowledgeBase::open(config).await?;
    let result = kb.search(&request).await;
    kb.close().await;
    let response = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &SearchResponse) {
    if let Some(reason) = &response.degraded {
        println!("note: partial results ({})", reason);
        println!();
    }

    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in response.results.iter().enumerate() {
        let item = &result.item;
        let paths: Vec<&str> = result
            .context
            .paths
            .iter()
            .map(|p| match p {
                RetrievalPath::Vector => "vector",
                RetrievalPath::Lexical => "lexical",
            })
            .collect();

        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            item.source,
            item.title
        );
        println!("    type: {}", item.content_type);
        println!("    updated: {}", item.updated_at.format("%Y-%m-%d"));
        println!("    matched: {} ({})", paths.join("+"), result.context.fusion);
        if !item.tags.is_empty() {
            println!("    tags: {}", item.tags.join(", "));
        }
        println!(
            "    excerpt: \"{}\"",
            result.highlight.replace('\n', " ").trim()
        );
        println!("    id: {}", item.id);
        println!();
    }
    println!(
        "{} result{} in {} ms",
        response.results.len(),
        if response.results.len() == 1 { "" } else { "s" },
        response.took.as_millis()
    );
}
