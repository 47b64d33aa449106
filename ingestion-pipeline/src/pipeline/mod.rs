mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{RetrievalConfig, RetrievalTuning};
pub use context::StageError;
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        cache::CacheStore,
        store::StorageManager,
        types::{index_entry::IndexEntry, WorkItem},
    },
    utils::config::AppConfig,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{envelope::EnvelopeParser, fetcher::RecordFetcher, worker_pool::WorkerPool};

use self::{
    context::ItemContext,
    stages::{fetch, finish, parse, persist, skip_cached},
    state::pending,
};

/// Summary of one retrieval run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Entries handed to the run, duplicates included.
    pub total: usize,
    pub duplicates: usize,
    pub cached: usize,
    pub persisted: usize,
    /// Persisted records whose content came out empty.
    pub empty: usize,
    pub failed: usize,
    /// Items never started because the run halted.
    pub skipped: usize,
    pub halted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Cached,
    Persisted { empty: bool },
    Skipped,
}

/// Drives index entries through cache lookup, fetch, parse and persist.
#[allow(clippy::module_name_repetitions)]
pub struct RetrievalPipeline {
    cache: Arc<CacheStore>,
    pipeline_config: RetrievalConfig,
    services: Arc<dyn PipelineServices>,
}

impl RetrievalPipeline {
    pub fn new(
        config: &AppConfig,
        cache: Arc<CacheStore>,
        raw_store: StorageManager,
        parser: EnvelopeParser,
    ) -> Result<Self, AppError> {
        let pipeline_config = RetrievalConfig::from_app_config(config);
        let fetcher = RecordFetcher::new(config, raw_store)
            .map_err(|err| AppError::Validation(err.to_string()))?;
        let services = DefaultPipelineServices::new(
            fetcher,
            parser,
            Arc::clone(&cache),
            pipeline_config.tuning.max_hot_log_lines,
        );

        Ok(Self::with_services(
            cache,
            pipeline_config,
            Arc::new(services),
        ))
    }

    pub fn with_services(
        cache: Arc<CacheStore>,
        pipeline_config: RetrievalConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Self {
        Self {
            cache,
            pipeline_config,
            services,
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    /// Pair every distinct entry with its cache verdict.
    ///
    /// Entries sharing an identity key with an earlier entry are dropped, so a
    /// key is fetched at most once per run. Returns the work items and the
    /// number of dropped duplicates.
    pub async fn plan(&self, bucket: &str, entries: Vec<IndexEntry>) -> (Vec<WorkItem>, usize) {
        let mut seen = HashSet::new();
        let mut duplicates = 0usize;
        let mut items = Vec::with_capacity(entries.len());

        for entry in entries {
            let identity_key = entry.identity_key();
            if !seen.insert(identity_key.clone()) {
                duplicates = duplicates.saturating_add(1);
                continue;
            }
            let cached = self.cache.exists(bucket, &identity_key).await;
            items.push(WorkItem::new(entry, cached));
        }

        (items, duplicates)
    }

    #[tracing::instrument(skip_all, fields(bucket = %bucket, entries = entries.len()))]
    pub async fn run(&self, bucket: &str, entries: Vec<IndexEntry>) -> RunReport {
        let started = Instant::now();
        let total = entries.len();
        let (items, duplicates) = self.plan(bucket, entries).await;
        let scheduled = items.len();
        if duplicates > 0 {
            warn!(bucket, duplicates, "collapsed duplicate index entries");
        }

        let halted = AtomicBool::new(false);
        let pool = WorkerPool::new(self.pipeline_config.tuning.worker_count);
        let outcomes = pool
            .run(items, |item| self.process_item(bucket, item, &halted))
            .await;

        let mut report = RunReport {
            total,
            duplicates,
            halted: halted.load(Ordering::SeqCst),
            ..RunReport::default()
        };
        for outcome in &outcomes {
            match outcome {
                ItemOutcome::Cached => report.cached = report.cached.saturating_add(1),
                ItemOutcome::Persisted { empty } => {
                    report.persisted = report.persisted.saturating_add(1);
                    if *empty {
                        report.empty = report.empty.saturating_add(1);
                    }
                }
                ItemOutcome::Skipped => report.skipped = report.skipped.saturating_add(1),
            }
        }
        report.failed = scheduled.saturating_sub(outcomes.len());

        info!(
            bucket,
            total = report.total,
            duplicates = report.duplicates,
            cached = report.cached,
            persisted = report.persisted,
            empty = report.empty,
            failed = report.failed,
            skipped = report.skipped,
            halted = report.halted,
            total_ms = Self::duration_millis(started.elapsed()),
            "retrieval run finished"
        );
        report
    }

    async fn process_item(
        &self,
        bucket: &str,
        item: WorkItem,
        halted: &AtomicBool,
    ) -> Result<ItemOutcome, StageError> {
        let mut ctx = ItemContext::new(bucket, &item.entry, self.services.as_ref());
        let machine = pending();

        if item.cached {
            let _machine = skip_cached(machine, &ctx)?;
            return Ok(ItemOutcome::Cached);
        }
        if halted.load(Ordering::SeqCst) {
            debug!(
                bucket,
                identity_key = %ctx.identity_key,
                "skipping item after halt"
            );
            return Ok(ItemOutcome::Skipped);
        }

        let result = async {
            let machine = fetch(machine, &mut ctx).await?;
            let machine = parse(machine, &mut ctx).await?;
            let (machine, empty) = persist(machine, &mut ctx).await?;
            let _machine = finish(machine)?;
            Ok::<_, StageError>(ItemOutcome::Persisted { empty })
        }
        .await;

        result.map_err(|err| {
            if err.is_fatal() {
                halted.store(true, Ordering::SeqCst);
            }
            ctx.abort(err)
        })
    }
}
