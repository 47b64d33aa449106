mod args;

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use common::{
    storage::{
        cache::{CacheConfig, CacheStore},
        store::StorageManager,
        types::index_entry::IndexEntry,
    },
    utils::config::get_config,
};
use ingestion_pipeline::{EnvelopeParser, RetrievalPipeline};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::args::{Cli, Command, Extractor};

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serializing report")?;
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let mut config = get_config().context("loading configuration")?;
    if let Some(cache_dir) = cli.cache_dir {
        config.cache_dir = Some(cache_dir);
    }

    let cache_root = config.cache_root();
    let cache = Arc::new(
        CacheStore::open(CacheConfig::from_app_config(&config))
            .await
            .with_context(|| format!("cache root {} is not usable", cache_root.display()))?,
    );

    match cli.command {
        Command::Retrieve {
            bucket,
            index,
            workers,
            extractor,
        } => {
            if let Some(workers) = workers {
                config.worker_count = workers;
            }
            let entries = IndexEntry::load_jsonl(&index)
                .await
                .with_context(|| format!("reading index entries from {}", index.display()))?;
            let raw_store = StorageManager::new(&config)
                .await
                .context("opening raw record store")?;
            let parser = match extractor {
                Extractor::Readability => EnvelopeParser::readability(),
                Extractor::Passthrough => EnvelopeParser::passthrough(),
            };
            let pipeline = RetrievalPipeline::new(&config, Arc::clone(&cache), raw_store, parser)
                .context("building retrieval pipeline")?;

            let report = pipeline.run(&bucket, entries).await;
            print_json(&report)?;
            if report.halted {
                bail!("retrieval for bucket {bucket} halted on a fatal error");
            }
        }
        Command::Compact { bucket, threshold } => match cache.compact(&bucket, threshold).await {
            Some(path) => info!(bucket = %bucket, path = %path.display(), "hot log compacted"),
            None => info!(bucket = %bucket, threshold, "nothing to compact"),
        },
        Command::Strip { bucket } => {
            let report = cache.strip_empty(&bucket).await;
            print_json(&report)?;
            if report.files_failed > 0 {
                bail!(
                    "{} file(s) of bucket {bucket} could not be stripped",
                    report.files_failed
                );
            }
        }
        Command::Redump { bucket, threshold } => {
            let threshold = threshold.unwrap_or(config.max_hot_log_lines);
            match cache.redump(&bucket, threshold).await {
                Some(report) => print_json(&report)?,
                None => bail!("redump of bucket {bucket} did not complete"),
            }
        }
        Command::Stats { bucket } => print_json(&cache.stats(&bucket).await)?,
    }

    Ok(())
}
