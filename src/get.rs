//! `kb get` and `kb delete`: single-item lookup and removal.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::engine::KnowledgeBase;

pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let item = kb.get(id).await;
    kb.close().await;

    let item = match item? {
        Some(item) => item,
        None => bail!("Item not found: {}", id),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
        return Ok(());
    }

    println!("--- Item ---");
    println!("id:           {}", item.id);
    println!("title:        {}", item.title);
    println!("source:       {}", item.source);
    println!("content_type: {}", item.content_type);
    println!("tags:         {}", item.tags.join(", "));
    println!("created_at:   {}", item.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("updated_at:   {}", item.updated_at.format("%Y-%m-%d %H:%M:%S"));
    println!("fingerprint:  {}", item.fingerprint());
    println!(
        "metadata:     {}",
        serde_json::Value::Object(item.metadata.clone())
    );
    println!();

    println!("--- Content ---");
    println!("{}", item.content);
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let kb = KnowledgeBase::open(config).await?;
    let removed = kb.delete(id).await;
    kb.close().await;

    if removed? {
        println!("deleted {}", id);
        Ok(())
    } else {
        bail!("Item not found: {}", id)
    }
}
