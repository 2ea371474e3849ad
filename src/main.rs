//! Shared Counts command line tool
//!
//! Loads configuration, opens the file-backed store and runs one maintenance
//! command against it.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use shared_counts::{
    ContentCatalog, ContentResolver, CountGroup, CountStore, Counts, CountsConfig, FileBackend,
    ItemKey, ShareCounts,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Command-line arguments for the shared-counts binary.
#[derive(Debug, Parser)]
#[command(name = "shared-counts", version, about = "Social share count maintenance")]
struct CliArgs {
    /// Path to the configuration file.
    #[arg(
        long = "config",
        env = "SHARED_COUNTS_CONFIG",
        value_name = "PATH",
        default_value = "shared_counts.yaml"
    )]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short = 'v', action = clap::ArgAction::SetTrue)]
    verbose: bool,

    /// Print Prometheus metrics after the command.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand, Clone)]
enum Command {
    /// Refresh one item now: a content ID, `site`, or a URL.
    Update { key: String },
    /// Make sure up to `count` items have counts, refreshing `interval` per run.
    #[command(name = "bulk-update")]
    BulkUpdate {
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value_t = 20)]
        interval: usize,
    },
    /// Show the stored counts of a content item.
    Display { id: u64 },
    /// List the most shared content items.
    Popular {
        #[arg(long, default_value_t = 3)]
        count: usize,
    },
    /// Delete every stored count.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Initialize logging
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Loading configuration from: {}", args.config.display());
    let config = CountsConfig::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    info!("  - Count source: {:?}", config.count_source);
    info!("  - Query services: {:?}", config.query_services);
    info!("  - Preserve http: {}", config.preserve_http);
    info!("  - Store directory: {}", config.store_dir);

    let catalog = match &config.catalog_path {
        Some(path) => ContentCatalog::from_file(path)
            .with_context(|| format!("failed to load content catalog {}", path))?,
        None => ContentCatalog::default(),
    };
    let catalog = Arc::new(catalog);
    let store = CountStore::new(Arc::new(FileBackend::new(&config.store_dir)));
    let engine = ShareCounts::new(Arc::new(config), store, catalog.clone())?;

    match args.command {
        Command::Update { key } => {
            let key: ItemKey = key.parse()?;
            let counts = engine.update_item(&key).await?;
            print_services(&counts);
            println!("Share counts updated.");
        }
        Command::BulkUpdate { count, interval } => {
            let report = engine.backfill(count, interval).await?;
            println!("Currently {} items with share counts", report.existing);
            println!("Updated {} items with share counts", report.refreshed);
            if report.failed > 0 {
                println!("Failed to update {} items", report.failed);
            }
        }
        Command::Display { id } => display(&engine, catalog.as_ref(), id).await?,
        Command::Popular { count } => {
            let popular = engine.popular(count).await?;
            if popular.is_empty() {
                println!("No popular items found!");
            }
            for (id, total) in popular {
                let (title, url) = match catalog.resolve(id).await {
                    Some(info) => (info.title, info.url),
                    None => (String::new(), String::new()),
                };
                println!("{}\t{}\t{}\t{}", id, title, url, total);
            }
        }
        Command::Reset => {
            engine.reset().await?;
            println!("All share counts deleted.");
        }
    }

    if args.metrics {
        print!("{}", engine.metrics().render());
    }

    Ok(())
}

async fn display(engine: &ShareCounts, catalog: &ContentCatalog, id: u64) -> anyhow::Result<()> {
    let Some(info) = catalog.resolve(id).await else {
        bail!("Item {} doesn't exist.", id);
    };
    if !engine.config().counts_enabled() {
        bail!("Counts are not turned on in the configuration.");
    }

    let doc = match engine.document(id).await? {
        Some(doc) if doc.has_data() => doc,
        _ => {
            println!("No share counts downloaded for this item.");
            return Ok(());
        }
    };

    println!("{}", info.title);
    println!("Total: {}", doc.total);
    print_breakdown(&doc.counts);

    for (slug, group) in &doc.groups {
        println!();
        print_group(slug, group);
    }

    if let Some(last_updated) = doc.last_updated {
        println!();
        println!("Last updated: {} (epoch seconds)", last_updated);
    }
    Ok(())
}

fn print_group(slug: &str, group: &CountGroup) {
    let state = if group.disabled { " (updates disabled)" } else { "" };
    match &group.url {
        Some(url) => println!("{} [{}] {}{}", group.name, slug, url, state),
        None => println!("{} [{}]", group.name, slug),
    }
    println!("Total: {}", group.total);
    print_breakdown(&group.counts);
}

fn print_breakdown(counts: &Counts) {
    let value = |path: &[&str]| counts.value(path).unwrap_or(0);
    println!("Facebook Total: {}", value(&["Facebook", "total_count"]));
    println!("Facebook Likes: {}", value(&["Facebook", "like_count"]));
    println!("Facebook Shares: {}", value(&["Facebook", "share_count"]));
    println!("Facebook Comments: {}", value(&["Facebook", "comment_count"]));
    println!("Twitter: {}", value(&["Twitter"]));
    println!("Pinterest: {}", value(&["Pinterest"]));
    println!("Yummly: {}", value(&["Yummly"]));
    println!("LinkedIn: {}", value(&["LinkedIn"]));
}

fn print_services(counts: &Counts) {
    for (service, value) in counts.iter() {
        println!("{}: {}", service, value.total());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bulk_update_defaults() {
        let args = CliArgs::parse_from(["shared-counts", "bulk-update"]);
        match args.command {
            Command::BulkUpdate { count, interval } => {
                assert_eq!(count, 100);
                assert_eq!(interval, 20);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(args.config, PathBuf::from("shared_counts.yaml"));
    }

    #[test]
    fn test_parse_update_with_config() {
        let args = CliArgs::parse_from([
            "shared-counts",
            "--config",
            "/etc/shared-counts.yaml",
            "-v",
            "update",
            "site",
        ]);
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Update { ref key } if key == "site"));
    }
}
