use std::{fmt, path::Path};

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize,
};
use tracing::{info, warn};

use crate::error::AppError;

/// One pointer into a remote archive segment, as returned by the index server.
///
/// Index servers emit many more fields (timestamp, mime, status, languages...);
/// those are ignored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub url: String,
    /// Reversed-domain sort key, e.g. `com,example)/path`.
    #[serde(default)]
    pub urlkey: String,
    pub digest: String,
    pub filename: String,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub offset: u64,
    #[serde(deserialize_with = "deserialize_flexible_u64")]
    pub length: u64,
}

struct FlexibleU64Visitor;

impl Visitor<'_> for FlexibleU64Visitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an unsigned integer or a string holding one")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(value).map_err(|_| E::custom(format!("negative value {value}")))
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        value
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid integer string '{value}'")))
    }
}

fn deserialize_flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(FlexibleU64Visitor)
}

impl IndexEntry {
    pub fn new(
        url: impl Into<String>,
        urlkey: impl Into<String>,
        digest: impl Into<String>,
        filename: impl Into<String>,
        offset: u64,
        length: u64,
    ) -> Self {
        Self {
            url: url.into(),
            urlkey: urlkey.into(),
            digest: digest.into(),
            filename: filename.into(),
            offset,
            length,
        }
    }

    /// Stable identity of the record: `<segment stem>/<digest>`.
    pub fn identity_key(&self) -> String {
        format!("{}/{}", self.segment_stem(), self.digest)
    }

    /// Last component of the segment filename with every extension removed.
    pub fn segment_stem(&self) -> &str {
        let name = self.filename.rsplit('/').next().unwrap_or_default();
        name.split('.').next().unwrap_or_default()
    }

    /// Inclusive byte range covered by this entry.
    pub fn byte_range(&self) -> Option<(u64, u64)> {
        let last = self.offset.checked_add(self.length)?.checked_sub(1)?;
        (self.length > 0).then_some((self.offset, last))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.digest.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "index entry for {} has no digest",
                self.url
            )));
        }
        if self.segment_stem().is_empty() {
            return Err(AppError::Validation(format!(
                "index entry for {} has no segment filename",
                self.url
            )));
        }
        if self.byte_range().is_none() {
            return Err(AppError::Validation(format!(
                "index entry for {} has an invalid byte range (offset {}, length {})",
                self.url, self.offset, self.length
            )));
        }
        Ok(())
    }

    /// Host part of the entry in reversed-domain order, safe for use as a path segment.
    pub fn domain(&self) -> String {
        let from_key = self
            .urlkey
            .split(')')
            .next()
            .map(str::trim)
            .filter(|host| !host.is_empty());

        let domain = match from_key {
            Some(host) => host.to_string(),
            None => url::Url::parse(&self.url)
                .ok()
                .and_then(|parsed| parsed.host_str().map(reverse_host))
                .unwrap_or_default(),
        };

        sanitize_path_segment(&domain)
    }

    /// Location of the raw compressed record inside the raw record store.
    pub fn raw_record_location(&self, bucket: &str) -> String {
        format!(
            "{}/{}/{}.gz",
            sanitize_path_segment(bucket),
            self.domain(),
            sanitize_path_segment(&self.digest)
        )
    }

    /// Load already-materialized index results stored as JSON lines.
    ///
    /// Malformed lines are logged and skipped.
    pub async fn load_jsonl(path: impl AsRef<Path>) -> Result<Vec<Self>, AppError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Self>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    skipped = skipped.saturating_add(1);
                    warn!(
                        path = %path.display(),
                        line = line_no.saturating_add(1),
                        error = %err,
                        "Skipping malformed index entry"
                    );
                }
            }
        }

        info!(
            path = %path.display(),
            entries = entries.len(),
            skipped,
            "Loaded index entries"
        );

        Ok(entries)
    }
}

fn reverse_host(host: &str) -> String {
    host.split('.').rev().collect::<Vec<_>>().join(",")
}

fn sanitize_path_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, ',' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_unknown".to_string()
    } else {
        cleaned
    }
}
