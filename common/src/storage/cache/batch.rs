use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, StringArray},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter, ProjectionMask},
    basic::Compression,
    file::properties::WriterProperties,
};

use crate::{
    error::AppError,
    storage::types::extraction_record::{ExtractionRecord, RecordColumn},
};

fn record_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(RecordColumn::IdentityKey.name(), DataType::Utf8, false),
        Field::new(RecordColumn::Content.name(), DataType::Utf8, false),
    ]))
}

/// Batch files of a bucket, sorted numerically by batch number.
///
/// Anything not named `<bucket>_<n>.parquet` is ignored, including the
/// temporary files written during compaction.
pub fn list_batch_files(dir: &Path, bucket: &str) -> Result<Vec<(u64, PathBuf)>, AppError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let prefix = format!("{bucket}_");
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let number = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".parquet"))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(number) = number {
            files.push((number, entry.path()));
        }
    }
    files.sort_by_key(|(number, _)| *number);
    Ok(files)
}

/// Next unused batch number: one past the highest existing number.
pub fn next_batch_number(files: &[(u64, PathBuf)]) -> u64 {
    files
        .iter()
        .map(|(number, _)| *number)
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

pub fn batch_file_name(bucket: &str, number: u64) -> String {
    format!("{bucket}_{number}.parquet")
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write records as a snappy-compressed Parquet file.
///
/// The file is written under a temporary name, synced, then renamed into
/// place, so `path` either does not exist or holds the complete batch.
pub fn write_batch(path: &Path, records: &[ExtractionRecord]) -> Result<(), AppError> {
    let schema = record_schema();
    let keys: ArrayRef = Arc::new(StringArray::from_iter_values(
        records.iter().map(|r| r.identity_key.as_str()),
    ));
    let contents: ArrayRef = Arc::new(StringArray::from_iter_values(
        records.iter().map(|r| r.content.as_str()),
    ));
    let batch = RecordBatch::try_new(Arc::clone(&schema), vec![keys, contents])?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let tmp = temp_path_for(path);
    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    if batch.num_rows() > 0 {
        writer.write(&batch)?;
    }
    let file = writer.into_inner()?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read every record of a batch file.
///
/// With a projection only that column is decoded; the other field of each
/// returned record is left empty.
pub fn read_batch(
    path: &Path,
    projection: Option<RecordColumn>,
) -> Result<Vec<ExtractionRecord>, AppError> {
    let file = File::open(path)?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    if let Some(column) = projection {
        let index = builder.schema().index_of(column.name())?;
        let mask = ProjectionMask::roots(builder.parquet_schema(), [index]);
        builder = builder.with_projection(mask);
    }
    let reader = builder.build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let keys = string_column(&batch, RecordColumn::IdentityKey, path)?;
        let contents = string_column(&batch, RecordColumn::Content, path)?;

        for row in 0..batch.num_rows() {
            records.push(ExtractionRecord {
                identity_key: value_at(keys, row),
                content: value_at(contents, row),
            });
        }
    }
    Ok(records)
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    column: RecordColumn,
    path: &Path,
) -> Result<Option<&'a StringArray>, AppError> {
    let Some(array) = batch.column_by_name(column.name()) else {
        return Ok(None);
    };
    array
        .as_any()
        .downcast_ref::<StringArray>()
        .map(Some)
        .ok_or_else(|| {
            AppError::Processing(format!(
                "column {} of {} is not utf8",
                column.name(),
                path.display()
            ))
        })
}

fn value_at(array: Option<&StringArray>, row: usize) -> String {
    match array {
        Some(values) if !values.is_null(row) => values.value(row).to_string(),
        _ => String::new(),
    }
}
