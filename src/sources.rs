//! `kb sources`: list configured collectors.

use anyhow::Result;

use crate::config::{CollectorConfig, Config};

pub fn run_sources(config: &Config) -> Result<()> {
    if config.collectors.is_empty() {
        println!("No collectors configured.");
        return Ok(());
    }

    println!(
        "{:<16} {:<12} {:<9} {:>9}   {}",
        "NAME", "KIND", "ENABLED", "MAX ITEMS", "TARGET"
    );
    for collector in &config.collectors {
        let target = match collector {
            CollectorConfig::Filesystem(c) => c.root.display().to_string(),
            CollectorConfig::Github(c)
            | CollectorConfig::Secrets(c)
            | CollectorConfig::Containers(c) => c.base_url.clone(),
        };
        println!(
            "{:<16} {:<12} {:<9} {:>9}   {}",
            collector.name(),
            collector.kind(),
            if collector.enabled() { "yes" } else { "no" },
            collector.max_items(),
            target
        );
    }
    Ok(())
}
