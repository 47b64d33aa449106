use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::warn;

use crate::{error::AppError, storage::types::extraction_record::ExtractionRecord};

pub fn hot_log_path(dir: &Path, bucket: &str) -> PathBuf {
    dir.join(format!("{bucket}.jsonl"))
}

/// Read every record of a hot log. A missing file reads as empty.
///
/// Lines that fail to parse (for instance a torn final write) are logged and
/// skipped.
pub fn read_hot_log(path: &Path) -> Result<Vec<ExtractionRecord>, AppError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ExtractionRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(
                path = %path.display(),
                line = line_no.saturating_add(1),
                error = %err,
                "Skipping unreadable hot log line"
            ),
        }
    }
    Ok(records)
}

/// Whether the file is non-empty and its last byte is not a newline, which
/// is what a torn final write leaves behind.
fn ends_mid_line(file: &mut File) -> Result<bool, AppError> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last != *b"\n")
}

/// Append records as JSON lines and sync the file.
///
/// A torn trailing line is closed off first so the new records start on a
/// line of their own.
pub fn append_records(path: &Path, records: &[ExtractionRecord]) -> Result<(), AppError> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let torn = ends_mid_line(&mut file)?;

    let mut writer = BufWriter::new(file);
    if torn {
        warn!(path = %path.display(), "Hot log ends mid-line, starting a new line");
        writer.write_all(b"\n")?;
    }
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    let file = writer.into_inner().map_err(|err| AppError::Io(err.into_error()))?;
    file.sync_data()?;
    Ok(())
}

/// Replace the hot log with exactly `records` via temp file and rename.
pub fn rewrite_hot_log(path: &Path, records: &[ExtractionRecord]) -> Result<(), AppError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.tmp"));

    let _ = std::fs::remove_file(&tmp);
    append_records(&tmp, records)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Empty the hot log in place.
pub fn truncate_hot_log(path: &Path) -> Result<(), AppError> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_read_and_truncate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = hot_log_path(dir.path(), "2024-10");
        assert!(read_hot_log(&path).expect("read missing").is_empty());

        append_records(&path, &[ExtractionRecord::new("s/A", "一些中文")]).expect("append");
        append_records(&path, &[ExtractionRecord::new("s/B", "")]).expect("append");

        let records = read_hot_log(&path).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content, "一些中文");
        assert!(records[1].is_empty());

        truncate_hot_log(&path).expect("truncate");
        assert!(read_hot_log(&path).expect("read").is_empty());
        assert!(path.exists());
    }

    #[test]
    fn torn_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = hot_log_path(dir.path(), "b");
        std::fs::write(
            &path,
            "{\"identity_key\":\"s/A\",\"content\":\"x\"}\n{\"identity_key\":\"s/B\",\"con",
        )
        .expect("write");

        let records = read_hot_log(&path).expect("read");
        assert_eq!(records, vec![ExtractionRecord::new("s/A", "x")]);
    }

    #[test]
    fn append_after_torn_line_starts_a_new_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = hot_log_path(dir.path(), "b");
        std::fs::write(
            &path,
            "{\"identity_key\":\"s/A\",\"content\":\"x\"}\n{\"identity_key\":\"s/B\",\"con",
        )
        .expect("write");

        append_records(&path, &[ExtractionRecord::new("s/C", "c")]).expect("append");

        let records = read_hot_log(&path).expect("read");
        assert_eq!(
            records,
            vec![ExtractionRecord::new("s/A", "x"), ExtractionRecord::new("s/C", "c")]
        );
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = hot_log_path(dir.path(), "b");
        append_records(
            &path,
            &[ExtractionRecord::new("s/A", ""), ExtractionRecord::new("s/B", "b")],
        )
        .expect("append");

        rewrite_hot_log(&path, &[ExtractionRecord::new("s/B", "b")]).expect("rewrite");
        assert_eq!(
            read_hot_log(&path).expect("read"),
            vec![ExtractionRecord::new("s/B", "b")]
        );
    }
}
