use std::{io::Read, time::Duration};

use bytes::Bytes;
use common::{
    storage::{store::StorageManager, types::index_entry::IndexEntry},
    utils::config::AppConfig,
};
use flate2::read::MultiGzDecoder;
use rand::seq::SliceRandom;
use reqwest::{
    header::{RANGE, USER_AGENT},
    StatusCode,
};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The item can be retried on a later run.
    Transient,
    /// Every further request will fail the same way.
    Fatal,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("transport error for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("access denied ({status}) for {url}")]
    AccessDenied { url: String, status: u16 },
    #[error("malformed range response for {url}: {reason}")]
    MalformedRange { url: String, reason: String },
    #[error("could not decompress record {identity_key}: {source}")]
    Decompress {
        identity_key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid index entry: {0}")]
    InvalidEntry(String),
    #[error("invalid archive url: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            Self::AccessDenied { .. } | Self::InvalidUrl(_) => FetchErrorKind::Fatal,
            Self::Timeout { .. }
            | Self::Transport { .. }
            | Self::Status { .. }
            | Self::MalformedRange { .. }
            | Self::Decompress { .. }
            | Self::InvalidEntry(_) => FetchErrorKind::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == FetchErrorKind::Fatal
    }
}

/// Fetches single records out of remote archive segments with HTTP range
/// requests, keeping a raw copy of every record it downloads.
pub struct RecordFetcher {
    client: reqwest::Client,
    base_url: String,
    user_agents: Vec<String>,
    raw_store: StorageManager,
}

impl RecordFetcher {
    pub fn new(config: &AppConfig, raw_store: StorageManager) -> Result<Self, FetchError> {
        let base_url = config.archive_base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|err| FetchError::InvalidUrl(format!("{base_url}: {err}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|err| FetchError::Transport {
                url: base_url.clone(),
                source: err,
            })?;

        Ok(Self {
            client,
            base_url,
            user_agents: config.user_agents.clone(),
            raw_store,
        })
    }

    /// Location of the segment holding `entry`.
    pub fn record_url(&self, entry: &IndexEntry) -> Result<Url, FetchError> {
        let raw = format!("{}/{}", self.base_url, entry.filename.trim_start_matches('/'));
        Url::parse(&raw).map_err(|err| FetchError::InvalidUrl(format!("{raw}: {err}")))
    }

    /// Value of the `Range` header covering exactly the entry's bytes.
    pub fn range_header(entry: &IndexEntry) -> Option<String> {
        entry
            .byte_range()
            .map(|(first, last)| format!("bytes={first}-{last}"))
    }

    /// Fetch and decompress the record behind `entry`.
    ///
    /// A raw copy already present in the raw store is used instead of the
    /// network unless it fails to decompress, in which case the record is
    /// downloaded again. Freshly downloaded bytes are stored before
    /// decompression and replace any unusable copy.
    #[tracing::instrument(
        skip_all,
        fields(bucket = %bucket, identity_key = %entry.identity_key())
    )]
    pub async fn fetch(&self, entry: &IndexEntry, bucket: &str) -> Result<Bytes, FetchError> {
        let identity_key = entry.identity_key();

        match self.raw_store.load_raw_record(bucket, entry).await {
            Ok(Some(raw)) => match decompress(&identity_key, &raw) {
                Ok(body) => {
                    debug!(%identity_key, "using stored raw record");
                    return Ok(body);
                }
                Err(err) => {
                    warn!(
                        %identity_key,
                        error = %err,
                        "stored raw record is unusable, fetching again"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => {
                warn!(%identity_key, error = %err, "could not read stored raw record");
            }
        }

        let raw = self.fetch_raw(entry).await?;

        if let Err(err) = self
            .raw_store
            .store_raw_record(bucket, entry, raw.clone())
            .await
        {
            warn!(%identity_key, error = %err, "could not store raw record");
        }

        decompress(&identity_key, &raw)
    }

    async fn fetch_raw(&self, entry: &IndexEntry) -> Result<Bytes, FetchError> {
        let range = Self::range_header(entry).ok_or_else(|| {
            FetchError::InvalidEntry(format!(
                "{} has no usable byte range (offset {}, length {})",
                entry.url, entry.offset, entry.length
            ))
        })?;
        let url = self.record_url(entry)?;
        let url_str = url.to_string();

        let mut request = self.client.get(url).header(RANGE, &range);
        if let Some(agent) = self.user_agents.choose(&mut rand::thread_rng()) {
            request = request.header(USER_AGENT, agent);
        }

        let response = request
            .send()
            .await
            .map_err(|err| transport_error(&url_str, err))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(FetchError::AccessDenied {
                url: url_str,
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| transport_error(&url_str, err))?;

        check_range_body(status, body.len(), entry.length).map_err(|reason| {
            FetchError::MalformedRange {
                url: url_str.clone(),
                reason,
            }
        })?;

        debug!(url = %url_str, %range, bytes = body.len(), "fetched raw record");
        Ok(body)
    }
}

fn transport_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            source: err,
        }
    }
}

fn check_range_body(status: StatusCode, received: usize, requested: u64) -> Result<(), String> {
    let received = u64::try_from(received).unwrap_or(u64::MAX);
    if received == 0 {
        return Err("empty body".to_string());
    }
    if received > requested {
        return Err(format!(
            "received {received} bytes for a {requested} byte range"
        ));
    }
    if status != StatusCode::PARTIAL_CONTENT && received != requested {
        return Err(format!(
            "status {status} with {received} of {requested} requested bytes"
        ));
    }
    Ok(())
}

fn decompress(identity_key: &str, raw: &[u8]) -> Result<Bytes, FetchError> {
    let mut decoded = Vec::new();
    MultiGzDecoder::new(raw)
        .read_to_end(&mut decoded)
        .map_err(|source| FetchError::Decompress {
            identity_key: identity_key.to_string(),
            source,
        })?;
    Ok(Bytes::from(decoded))
}
