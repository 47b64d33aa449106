use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use tracing::{error, info, warn};

use super::{
    batch::{batch_file_name, list_batch_files, next_batch_number, read_batch, write_batch},
    hot_log::{hot_log_path, read_hot_log, rewrite_hot_log, truncate_hot_log},
    BucketStats, RedumpReport, StripReport,
};
use crate::{
    error::AppError,
    storage::types::extraction_record::{ExtractionRecord, RecordColumn},
};

#[allow(clippy::cast_precision_loss)]
fn empty_ratio(empty: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        empty as f64 / total as f64
    }
}

fn project(mut record: ExtractionRecord, projection: Option<RecordColumn>) -> ExtractionRecord {
    match projection {
        Some(RecordColumn::IdentityKey) => record.content.clear(),
        Some(RecordColumn::Content) => record.identity_key.clear(),
        None => {}
    }
    record
}

fn log_file_summary(
    bucket: &str,
    path: &Path,
    kind: &str,
    records: &[ExtractionRecord],
    started: Instant,
) {
    let empty = records.iter().filter(|r| r.is_empty()).count();
    info!(
        bucket,
        path = %path.display(),
        kind,
        records = records.len(),
        empty,
        empty_ratio = empty_ratio(empty, records.len()),
        read_ms = started.elapsed().as_millis(),
        "Read cache file"
    );
}

/// Files and hot log contents of a bucket captured at one point in time.
///
/// Batch files are immutable once renamed into place, so they can be read
/// after the bucket lock is released; the hot log is read while capturing.
#[derive(Debug, Default)]
pub struct BucketSnapshot {
    pub batch_files: Vec<PathBuf>,
    pub hot_log: Vec<ExtractionRecord>,
}

pub fn snapshot_bucket(dir: &Path, bucket: &str) -> Result<BucketSnapshot, AppError> {
    let batch_files = list_batch_files(dir, bucket)?
        .into_iter()
        .map(|(_, path)| path)
        .collect();

    let log_path = hot_log_path(dir, bucket);
    let started = Instant::now();
    let hot_log = read_hot_log(&log_path)?;
    log_file_summary(bucket, &log_path, "hot_log", &hot_log, started);

    Ok(BucketSnapshot {
        batch_files,
        hot_log,
    })
}

/// Read the batch files of a snapshot, then its hot log records, logging a
/// per-file summary.
///
/// Empty counts are only meaningful when the content column is read.
pub fn read_snapshot(
    bucket: &str,
    snapshot: BucketSnapshot,
    projection: Option<RecordColumn>,
) -> Result<Vec<ExtractionRecord>, AppError> {
    let started_scan = Instant::now();
    let mut records = Vec::new();

    for path in &snapshot.batch_files {
        let started = Instant::now();
        let file_records = read_batch(path, projection)?;
        log_file_summary(bucket, path, "batch", &file_records, started);
        records.extend(file_records);
    }
    records.extend(
        snapshot
            .hot_log
            .into_iter()
            .map(|r| project(r, projection)),
    );

    info!(
        bucket,
        records = records.len(),
        scan_ms = started_scan.elapsed().as_millis(),
        "Bucket scan finished"
    );
    Ok(records)
}

pub fn read_bucket(
    dir: &Path,
    bucket: &str,
    projection: Option<RecordColumn>,
) -> Result<Vec<ExtractionRecord>, AppError> {
    read_snapshot(bucket, snapshot_bucket(dir, bucket)?, projection)
}

/// Flush the whole hot log into the next numbered batch file, then empty it.
pub fn compact_hot_log(dir: &Path, bucket: &str) -> Result<Option<PathBuf>, AppError> {
    let log_path = hot_log_path(dir, bucket);
    let records = read_hot_log(&log_path)?;
    if records.is_empty() {
        return Ok(None);
    }

    let files = list_batch_files(dir, bucket)?;
    let target = dir.join(batch_file_name(bucket, next_batch_number(&files)));
    write_batch(&target, &records)?;
    truncate_hot_log(&log_path)?;

    info!(
        bucket,
        path = %target.display(),
        records = records.len(),
        "Compacted hot log"
    );
    Ok(Some(target))
}

/// Drop zero-length-content rows from every batch file and the hot log.
///
/// Files without empty rows are left untouched. A file that cannot be read or
/// rewritten is logged, counted in `files_failed` and left as it was; the
/// remaining files are still stripped.
pub fn strip_bucket(dir: &Path, bucket: &str) -> Result<StripReport, AppError> {
    let mut report = StripReport::default();

    for (_, path) in list_batch_files(dir, bucket)? {
        strip_file(
            bucket,
            &path,
            |p| read_batch(p, None),
            write_batch,
            &mut report,
        );
    }
    strip_file(
        bucket,
        &hot_log_path(dir, bucket),
        read_hot_log,
        rewrite_hot_log,
        &mut report,
    );

    Ok(report)
}

fn strip_file(
    bucket: &str,
    path: &Path,
    read: impl FnOnce(&Path) -> Result<Vec<ExtractionRecord>, AppError>,
    rewrite: impl FnOnce(&Path, &[ExtractionRecord]) -> Result<(), AppError>,
    report: &mut StripReport,
) {
    let outcome = read(path).and_then(|records| {
        let (kept, removed): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| !r.is_empty());
        if !removed.is_empty() {
            rewrite(path, &kept)?;
        }
        Ok((kept.len(), removed.len()))
    });

    match outcome {
        Ok((kept, removed)) => {
            report.records_kept = report.records_kept.saturating_add(kept);
            if removed > 0 {
                info!(
                    bucket,
                    path = %path.display(),
                    removed,
                    kept,
                    "Stripped empty records"
                );
                report.files_rewritten = report.files_rewritten.saturating_add(1);
                report.records_removed = report.records_removed.saturating_add(removed);
            }
        }
        Err(err) => {
            error!(
                bucket,
                path = %path.display(),
                error = %err,
                "Could not strip cache file, leaving it unchanged"
            );
            report.files_failed = report.files_failed.saturating_add(1);
        }
    }
}

fn staging_dir(root: &Path, bucket: &str) -> PathBuf {
    root.join(format!(".{bucket}.redump"))
}

fn retired_dir(root: &Path, bucket: &str) -> PathBuf {
    root.join(format!(".{bucket}.retired"))
}

/// Re-chunk a bucket into full batch files of `threshold` records plus a hot
/// log holding the remainder.
///
/// The new layout is staged in a sibling directory and only swapped in once
/// its record count matches the bucket's. On mismatch the bucket is left as
/// it was and `Ok(None)` is returned.
pub fn redump_bucket(
    root: &Path,
    bucket: &str,
    threshold: usize,
) -> Result<Option<RedumpReport>, AppError> {
    let dir = root.join(bucket);
    let records = read_bucket(&dir, bucket, None)?;
    let before = records.len();
    if before == 0 {
        return Ok(Some(RedumpReport::default()));
    }
    let threshold = threshold.max(1);

    let staging = staging_dir(root, bucket);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let mut remaining = records.as_slice();
    let mut batch_files = 0u64;
    while remaining.len() > threshold {
        let (chunk, rest) = remaining.split_at(threshold);
        write_batch(&staging.join(batch_file_name(bucket, batch_files)), chunk)?;
        batch_files = batch_files.saturating_add(1);
        remaining = rest;
    }
    rewrite_hot_log(&hot_log_path(&staging, bucket), remaining)?;

    let staged = read_bucket(&staging, bucket, Some(RecordColumn::IdentityKey))?.len();
    if staged != before {
        warn!(
            bucket,
            before,
            staged,
            "Redump record count mismatch, keeping existing layout"
        );
        std::fs::remove_dir_all(&staging)?;
        return Ok(None);
    }

    let retired = retired_dir(root, bucket);
    if retired.exists() {
        std::fs::remove_dir_all(&retired)?;
    }
    if dir.exists() {
        std::fs::rename(&dir, &retired)?;
    }
    std::fs::rename(&staging, &dir)?;
    if retired.exists() {
        std::fs::remove_dir_all(&retired)?;
    }

    let report = RedumpReport {
        records: before,
        batch_files: usize::try_from(batch_files).unwrap_or(usize::MAX),
        hot_log_lines: remaining.len(),
    };
    info!(
        bucket,
        records = report.records,
        batch_files = report.batch_files,
        hot_log_lines = report.hot_log_lines,
        "Redumped bucket"
    );
    Ok(Some(report))
}

pub fn bucket_stats(bucket: &str, snapshot: BucketSnapshot) -> Result<BucketStats, AppError> {
    let batch_files = snapshot.batch_files.len();
    let hot_log_lines = snapshot.hot_log.len();
    let records = read_snapshot(bucket, snapshot, None)?;
    let empty_records = records.iter().filter(|r| r.is_empty()).count();

    Ok(BucketStats {
        total_records: records.len(),
        empty_records,
        empty_ratio: empty_ratio(empty_records, records.len()),
        batch_files,
        hot_log_lines,
    })
}
