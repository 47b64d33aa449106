mod batch;
mod hot_log;
mod maintenance;

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    error::AppError,
    storage::types::extraction_record::{ExtractionRecord, RecordColumn},
    utils::config::AppConfig,
};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub max_hot_log_lines: usize,
}

impl CacheConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            root: config.cache_root(),
            max_hot_log_lines: config.max_hot_log_lines,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StripReport {
    pub files_rewritten: usize,
    /// Files that could not be stripped and were left unchanged.
    pub files_failed: usize,
    pub records_removed: usize,
    pub records_kept: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RedumpReport {
    pub records: usize,
    pub batch_files: usize,
    pub hot_log_lines: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub total_records: usize,
    pub empty_records: usize,
    pub empty_ratio: f64,
    pub batch_files: usize,
    pub hot_log_lines: usize,
}

/// In-memory view of one bucket, built on first access.
#[derive(Debug, Default)]
struct BucketState {
    keys: HashSet<String>,
    hot_log_lines: usize,
}

type BucketSlot = Arc<Mutex<Option<BucketState>>>;

/// Rolling extraction cache: a JSON-lines hot log per bucket that is
/// periodically compacted into numbered Parquet batch files.
///
/// Public operations never fail. Filesystem errors are logged and the
/// operation degrades to its empty result.
pub struct CacheStore {
    config: CacheConfig,
    buckets: Mutex<HashMap<String, BucketSlot>>,
}

impl CacheStore {
    /// Create the cache root and check that it is writable.
    pub async fn open(config: CacheConfig) -> Result<Self, AppError> {
        tokio::fs::create_dir_all(&config.root).await?;

        let probe = config.root.join(".write-probe");
        tokio::fs::write(&probe, b"ok").await?;
        tokio::fs::remove_file(&probe).await?;

        info!(root = %config.root.display(), "Opened extraction cache");
        Ok(Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// Whether a record with this identity key has been written to the bucket.
    pub async fn exists(&self, bucket: &str, identity_key: &str) -> bool {
        match self.try_exists(bucket, identity_key).await {
            Ok(found) => found,
            Err(err) => {
                error!(bucket, identity_key, error = %err, "Cache lookup failed");
                false
            }
        }
    }

    /// Append records to the bucket's hot log, returning how many were written.
    ///
    /// Records whose identity key is already cached are refused.
    pub async fn append(&self, bucket: &str, records: Vec<ExtractionRecord>) -> usize {
        match self.try_append(bucket, records).await {
            Ok(written) => written,
            Err(err) => {
                error!(bucket, error = %err, "Cache append failed");
                0
            }
        }
    }

    /// Flush the hot log into a new batch file once it holds `threshold` lines.
    pub async fn compact(&self, bucket: &str, threshold: usize) -> Option<PathBuf> {
        match self.try_compact(bucket, threshold).await {
            Ok(path) => path,
            Err(err) => {
                error!(bucket, threshold, error = %err, "Cache compaction failed");
                None
            }
        }
    }

    /// Read every record of the bucket, optionally only one column of it.
    pub async fn scan(
        &self,
        bucket: &str,
        projection: Option<RecordColumn>,
    ) -> Vec<ExtractionRecord> {
        match self.try_scan(bucket, projection).await {
            Ok(records) => records,
            Err(err) => {
                error!(bucket, error = %err, "Cache scan failed");
                Vec::new()
            }
        }
    }

    /// Remove records with empty content so their entries can be fetched again.
    pub async fn strip_empty(&self, bucket: &str) -> StripReport {
        match self.try_strip_empty(bucket).await {
            Ok(report) => report,
            Err(err) => {
                error!(bucket, error = %err, "Cache strip failed");
                StripReport::default()
            }
        }
    }

    /// Rewrite the bucket as full batch files of `threshold` records plus a hot log.
    pub async fn redump(&self, bucket: &str, threshold: usize) -> Option<RedumpReport> {
        match self.try_redump(bucket, threshold).await {
            Ok(report) => report,
            Err(err) => {
                error!(bucket, threshold, error = %err, "Cache redump failed");
                None
            }
        }
    }

    pub async fn stats(&self, bucket: &str) -> BucketStats {
        match self.try_stats(bucket).await {
            Ok(stats) => stats,
            Err(err) => {
                error!(bucket, error = %err, "Cache stats failed");
                BucketStats::default()
            }
        }
    }

    async fn try_exists(&self, bucket: &str, identity_key: &str) -> Result<bool, AppError> {
        let dir = self.bucket_dir(bucket)?;
        let slot = self.slot(bucket).await;
        let mut guard = slot.lock().await;
        let state = ensure_loaded(&dir, bucket, &mut guard).await?;
        Ok(state.keys.contains(identity_key))
    }

    async fn try_append(
        &self,
        bucket: &str,
        records: Vec<ExtractionRecord>,
    ) -> Result<usize, AppError> {
        let dir = self.bucket_dir(bucket)?;
        let slot = self.slot(bucket).await;
        let mut guard = slot.lock().await;
        let state = ensure_loaded(&dir, bucket, &mut guard).await?;

        let mut pending = HashSet::new();
        let mut fresh = Vec::with_capacity(records.len());
        for record in records {
            if state.keys.contains(&record.identity_key)
                || !pending.insert(record.identity_key.clone())
            {
                error!(
                    bucket,
                    identity_key = %record.identity_key,
                    "Refusing to append a record that is already cached"
                );
                continue;
            }
            fresh.push(record);
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        let path = hot_log::hot_log_path(&dir, bucket);
        let fresh = tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir)?;
            hot_log::append_records(&path, &fresh).map(|()| fresh)
        })
        .await??;

        state.hot_log_lines = state.hot_log_lines.saturating_add(fresh.len());
        state
            .keys
            .extend(fresh.iter().map(|r| r.identity_key.clone()));
        debug!(bucket, written = fresh.len(), "Appended records to hot log");
        Ok(fresh.len())
    }

    async fn try_compact(
        &self,
        bucket: &str,
        threshold: usize,
    ) -> Result<Option<PathBuf>, AppError> {
        let dir = self.bucket_dir(bucket)?;
        let slot = self.slot(bucket).await;
        let mut guard = slot.lock().await;
        let state = ensure_loaded(&dir, bucket, &mut guard).await?;

        if state.hot_log_lines == 0 || state.hot_log_lines < threshold.max(1) {
            return Ok(None);
        }

        let owned_bucket = bucket.to_string();
        let written =
            tokio::task::spawn_blocking(move || maintenance::compact_hot_log(&dir, &owned_bucket))
                .await??;
        state.hot_log_lines = 0;
        Ok(written)
    }

    async fn try_scan(
        &self,
        bucket: &str,
        projection: Option<RecordColumn>,
    ) -> Result<Vec<ExtractionRecord>, AppError> {
        let snapshot = self.snapshot(bucket).await?;
        let owned_bucket = bucket.to_string();
        tokio::task::spawn_blocking(move || {
            maintenance::read_snapshot(&owned_bucket, snapshot, projection)
        })
        .await?
    }

    /// Capture the bucket's batch file list and hot log under its lock.
    ///
    /// Batch files are read afterwards without the lock, so long scans do
    /// not hold up appends.
    async fn snapshot(&self, bucket: &str) -> Result<maintenance::BucketSnapshot, AppError> {
        let dir = self.bucket_dir(bucket)?;
        let slot = self.slot(bucket).await;
        let mut guard = slot.lock().await;
        // Loading finishes any interrupted compaction before files are listed.
        ensure_loaded(&dir, bucket, &mut guard).await?;

        let owned_bucket = bucket.to_string();
        tokio::task::spawn_blocking(move || maintenance::snapshot_bucket(&dir, &owned_bucket))
            .await?
    }

    async fn try_strip_empty(&self, bucket: &str) -> Result<StripReport, AppError> {
        let dir = self.bucket_dir(bucket)?;
        let slot = self.slot(bucket).await;
        let mut guard = slot.lock().await;

        let owned_bucket = bucket.to_string();
        let outcome =
            tokio::task::spawn_blocking(move || maintenance::strip_bucket(&dir, &owned_bucket))
                .await;
        // Rebuilt from disk on next access, also after a partial strip, so
        // stripped keys become fetchable again.
        *guard = None;
        let report = outcome??;

        if report.files_failed > 0 {
            warn!(
                bucket,
                files_failed = report.files_failed,
                "Some cache files could not be stripped"
            );
        }
        info!(
            bucket,
            files_rewritten = report.files_rewritten,
            records_removed = report.records_removed,
            records_kept = report.records_kept,
            "Stripped empty records"
        );
        Ok(report)
    }

    async fn try_redump(
        &self,
        bucket: &str,
        threshold: usize,
    ) -> Result<Option<RedumpReport>, AppError> {
        self.bucket_dir(bucket)?;
        let slot = self.slot(bucket).await;
        let mut guard = slot.lock().await;

        let root = self.config.root.clone();
        let owned_bucket = bucket.to_string();
        let report = tokio::task::spawn_blocking(move || {
            maintenance::redump_bucket(&root, &owned_bucket, threshold)
        })
        .await?;
        *guard = None;
        report
    }

    async fn try_stats(&self, bucket: &str) -> Result<BucketStats, AppError> {
        let snapshot = self.snapshot(bucket).await?;
        let owned_bucket = bucket.to_string();
        tokio::task::spawn_blocking(move || maintenance::bucket_stats(&owned_bucket, snapshot))
            .await?
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, AppError> {
        let valid = !bucket.is_empty()
            && !bucket.starts_with('.')
            && bucket
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(AppError::Validation(format!("invalid bucket name '{bucket}'")));
        }
        Ok(self.config.root.join(bucket))
    }

    async fn slot(&self, bucket: &str) -> BucketSlot {
        let mut buckets = self.buckets.lock().await;
        Arc::clone(
            buckets
                .entry(bucket.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }
}

async fn ensure_loaded<'a>(
    dir: &Path,
    bucket: &str,
    slot: &'a mut Option<BucketState>,
) -> Result<&'a mut BucketState, AppError> {
    if slot.is_none() {
        let dir = dir.to_path_buf();
        let owned_bucket = bucket.to_string();
        let state =
            tokio::task::spawn_blocking(move || load_bucket_state(&dir, &owned_bucket)).await??;
        *slot = Some(state);
    }
    slot.as_mut()
        .ok_or_else(|| AppError::InternalError(format!("bucket {bucket} state missing")))
}

/// Build the key index from the identity key column of every batch file
/// plus the hot log.
///
/// A hot log whose records all already live in batch files is the trace of a
/// compaction interrupted between rename and truncate; it is truncated here.
fn load_bucket_state(dir: &Path, bucket: &str) -> Result<BucketState, AppError> {
    let mut keys = HashSet::new();
    let batch_files = batch::list_batch_files(dir, bucket)?;
    for (_, path) in &batch_files {
        for record in batch::read_batch(path, Some(RecordColumn::IdentityKey))? {
            keys.insert(record.identity_key);
        }
    }

    let log_path = hot_log::hot_log_path(dir, bucket);
    let log_records = hot_log::read_hot_log(&log_path)?;
    let mut hot_log_lines = log_records.len();

    if !log_records.is_empty() && log_records.iter().all(|r| keys.contains(&r.identity_key)) {
        warn!(
            bucket,
            path = %log_path.display(),
            records = log_records.len(),
            "Hot log already compacted, truncating"
        );
        hot_log::truncate_hot_log(&log_path)?;
        hot_log_lines = 0;
    } else {
        keys.extend(log_records.into_iter().map(|r| r.identity_key));
    }

    info!(
        bucket,
        keys = keys.len(),
        batch_files = batch_files.len(),
        hot_log_lines,
        "Loaded bucket key index"
    );
    Ok(BucketState {
        keys,
        hot_log_lines,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    async fn open_store(root: &Path) -> CacheStore {
        CacheStore::open(CacheConfig {
            root: root.to_path_buf(),
            max_hot_log_lines: 3,
        })
        .await
        .expect("open cache")
    }

    fn record(key: &str, content: &str) -> ExtractionRecord {
        ExtractionRecord::new(key, content)
    }

    fn key_counts(records: &[ExtractionRecord]) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for r in records {
            *counts.entry(r.identity_key.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[tokio::test]
    async fn open_rejects_unusable_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file_root = dir.path().join("not-a-dir");
        std::fs::write(&file_root, b"x").expect("write file");

        let result = CacheStore::open(CacheConfig {
            root: file_root,
            max_hot_log_lines: 10,
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn append_makes_keys_visible_and_refuses_duplicates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        assert!(!store.exists("2024-10", "part-0/D1").await);
        let written = store
            .append(
                "2024-10",
                vec![record("part-0/D1", "Hello"), record("part-0/D2", "")],
            )
            .await;
        assert_eq!(written, 2);
        assert!(store.exists("2024-10", "part-0/D1").await);
        assert!(store.exists("2024-10", "part-0/D2").await);
        assert!(!store.exists("2024-18", "part-0/D1").await);

        let again = store
            .append(
                "2024-10",
                vec![
                    record("part-0/D1", "other"),
                    record("part-0/D3", "x"),
                    record("part-0/D3", "y"),
                ],
            )
            .await;
        assert_eq!(again, 1);

        let records = store.scan("2024-10", None).await;
        assert_eq!(records.len(), 3);
        assert!(records.contains(&record("part-0/D1", "Hello")));
        assert!(records.contains(&record("part-0/D3", "x")));
    }

    #[tokio::test]
    async fn compaction_never_loses_records() {
        for threshold in 1..=5 {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = open_store(dir.path()).await;

            for i in 0..7 {
                store
                    .append("b", vec![record(&format!("s/{i}"), &format!("c{i}"))])
                    .await;
                store.compact("b", threshold).await;
                assert_eq!(store.scan("b", None).await.len(), i + 1, "threshold {threshold}");
            }

            let counts = key_counts(&store.scan("b", None).await);
            assert_eq!(counts.len(), 7);
            assert!(counts.values().all(|c| *c == 1));
        }
    }

    #[tokio::test]
    async fn compact_respects_threshold_and_numbers_batches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        store
            .append("b", vec![record("s/A", "a"), record("s/B", "b")])
            .await;
        assert!(store.compact("b", 3).await.is_none());

        store.append("b", vec![record("s/C", "c")]).await;
        let first = store.compact("b", 3).await.expect("first batch");
        assert!(first.ends_with("b/b_0.parquet"));

        store.append("b", vec![record("s/D", "d")]).await;
        let second = store.compact("b", 1).await.expect("second batch");
        assert!(second.ends_with("b/b_1.parquet"));

        let stats = store.stats("b").await;
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.batch_files, 2);
        assert_eq!(stats.hot_log_lines, 0);
    }

    #[tokio::test]
    async fn key_index_is_rebuilt_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = open_store(dir.path()).await;
            store
                .append("b", vec![record("s/A", "a"), record("s/B", "")])
                .await;
            store.compact("b", 1).await.expect("compacted");
            store.append("b", vec![record("s/C", "c")]).await;
        }

        let reopened = open_store(dir.path()).await;
        assert!(reopened.exists("b", "s/A").await);
        assert!(reopened.exists("b", "s/B").await);
        assert!(reopened.exists("b", "s/C").await);
        assert!(!reopened.exists("b", "s/D").await);
        assert_eq!(reopened.append("b", vec![record("s/A", "dup")]).await, 0);
    }

    #[tokio::test]
    async fn interrupted_compaction_is_recovered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bucket_dir = dir.path().join("b");
        std::fs::create_dir_all(&bucket_dir).expect("mkdir");
        let records = vec![record("s/A", "a"), record("s/B", "b")];
        batch::write_batch(&bucket_dir.join("b_0.parquet"), &records).expect("batch");
        hot_log::append_records(&hot_log::hot_log_path(&bucket_dir, "b"), &records)
            .expect("hot log");

        let store = open_store(dir.path()).await;
        assert!(store.exists("b", "s/A").await);
        let scanned = store.scan("b", None).await;
        assert_eq!(scanned.len(), 2);
    }

    #[tokio::test]
    async fn scan_projects_columns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store.append("b", vec![record("s/A", "alpha")]).await;
        store.compact("b", 1).await;
        store.append("b", vec![record("s/B", "beta")]).await;

        let keys = store.scan("b", Some(RecordColumn::IdentityKey)).await;
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().all(|r| r.content.is_empty()));
        assert!(keys.iter().any(|r| r.identity_key == "s/A"));

        let contents = store.scan("b", Some(RecordColumn::Content)).await;
        assert!(contents.iter().all(|r| r.identity_key.is_empty()));
        assert!(contents.iter().any(|r| r.content == "beta"));
    }

    #[tokio::test]
    async fn strip_keeps_exactly_non_empty_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store
            .append("b", vec![record("s/A", "a"), record("s/B", ""), record("s/C", "c")])
            .await;
        store.compact("b", 1).await;
        store
            .append("b", vec![record("s/D", ""), record("s/E", "e")])
            .await;
        store.append("b2", vec![record("s/F", "f")]).await;
        store.compact("b2", 1).await;

        let report = store.strip_empty("b").await;
        assert_eq!(report.records_removed, 2);
        assert_eq!(report.records_kept, 3);
        assert_eq!(report.files_rewritten, 2);

        let mut keys: Vec<String> = store
            .scan("b", None)
            .await
            .into_iter()
            .map(|r| r.identity_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["s/A", "s/C", "s/E"]);
        assert!(!store.exists("b", "s/B").await);
        assert!(!store.exists("b", "s/D").await);

        let second = store.strip_empty("b").await;
        assert_eq!(second.records_removed, 0);
        assert_eq!(second.files_rewritten, 0);
        assert_eq!(second.records_kept, 3);

        let untouched = store.strip_empty("b2").await;
        assert_eq!(untouched.files_rewritten, 0);
    }

    #[tokio::test]
    async fn redump_preserves_every_record() {
        for threshold in [2usize, 3] {
            let dir = tempfile::tempdir().expect("tempdir");
            let store = open_store(dir.path()).await;
            for i in 0..8 {
                store
                    .append("b", vec![record(&format!("s/{i}"), &format!("c{i}"))])
                    .await;
                if i % 3 == 2 {
                    store.compact("b", 1).await;
                }
            }
            let before = key_counts(&store.scan("b", None).await);

            let report = store.redump("b", threshold).await.expect("redump");
            assert_eq!(report.records, 8);
            let after = key_counts(&store.scan("b", None).await);
            assert_eq!(before, after, "threshold {threshold}");

            let stats = store.stats("b").await;
            assert_eq!(stats.batch_files, report.batch_files);
            assert_eq!(stats.hot_log_lines, report.hot_log_lines);
            assert!(report.hot_log_lines <= threshold);
            assert!(report.hot_log_lines > 0);
            assert!(store.exists("b", "s/7").await);
            assert!(!dir.path().join(".b.redump").exists());
        }
    }

    #[tokio::test]
    async fn redump_of_exact_multiple_leaves_full_hot_log() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        let records: Vec<_> = (0..4).map(|i| record(&format!("s/{i}"), "x")).collect();
        store.append("b", records).await;

        let report = store.redump("b", 2).await.expect("redump");
        assert_eq!(report.batch_files, 1);
        assert_eq!(report.hot_log_lines, 2);
    }

    #[tokio::test]
    async fn stats_report_empty_ratio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store
            .append(
                "b",
                vec![record("s/A", "a"), record("s/B", ""), record("s/C", ""), record("s/D", "d")],
            )
            .await;

        let stats = store.stats("b").await;
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.empty_records, 2);
        assert!((stats.empty_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.hot_log_lines, 4);
    }

    #[tokio::test]
    async fn invalid_bucket_names_degrade() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;

        assert_eq!(store.append("../escape", vec![record("s/A", "a")]).await, 0);
        assert!(!store.exists("", "s/A").await);
        assert!(store.scan(".hidden", None).await.is_empty());
        assert!(store.redump("a/b", 2).await.is_none());
    }

    #[tokio::test]
    async fn append_after_torn_hot_log_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bucket_dir = dir.path().join("b");
        std::fs::create_dir_all(&bucket_dir).expect("mkdir");
        std::fs::write(
            hot_log::hot_log_path(&bucket_dir, "b"),
            "{\"identity_key\":\"s/A\",\"content\":\"a\"}\n{\"identity_key\":\"s/B\",\"con",
        )
        .expect("seed torn hot log");

        {
            let store = open_store(dir.path()).await;
            assert_eq!(store.append("b", vec![record("s/C", "c")]).await, 1);
        }

        let reopened = open_store(dir.path()).await;
        assert!(reopened.exists("b", "s/C").await);
        let mut keys: Vec<String> = reopened
            .scan("b", None)
            .await
            .into_iter()
            .map(|r| r.identity_key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["s/A", "s/C"]);
    }

    #[tokio::test]
    async fn partial_strip_resets_the_key_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(dir.path()).await;
        store
            .append("b", vec![record("s/A", ""), record("s/B", "b")])
            .await;
        store.compact("b", 1).await.expect("batch 0");
        store
            .append("b", vec![record("s/C", ""), record("s/D", "d")])
            .await;
        store.compact("b", 1).await.expect("batch 1");
        std::fs::create_dir(dir.path().join("b").join(".b_1.parquet.tmp"))
            .expect("block temp file");

        let report = store.strip_empty("b").await;
        assert_eq!(report.files_rewritten, 1);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.records_removed, 1);

        assert!(!store.exists("b", "s/A").await);
        assert!(store.exists("b", "s/C").await);
        assert_eq!(store.append("b", vec![record("s/A", "refetched")]).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_to_one_bucket_are_serialized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(open_store(dir.path()).await);

        let mut tasks = tokio::task::JoinSet::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                let mut written = 0;
                for i in 0..10 {
                    let key = format!("s/{worker}-{i}");
                    written += store.append("b", vec![record(&key, "x")]).await;
                    if i % 3 == 0 {
                        store.compact("b", 2).await;
                    }
                    if i % 4 == 0 {
                        store.scan("b", Some(RecordColumn::IdentityKey)).await;
                    }
                }
                written
            });
        }
        let mut written = 0;
        while let Some(result) = tasks.join_next().await {
            written += result.expect("append task");
        }
        assert_eq!(written, 80);

        let counts = key_counts(&store.scan("b", None).await);
        assert_eq!(counts.len(), 80);
        assert!(counts.values().all(|c| *c == 1));

        let reopened = open_store(dir.path()).await;
        assert_eq!(key_counts(&reopened.scan("b", None).await), counts);
    }
}
