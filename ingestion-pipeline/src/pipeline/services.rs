use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        cache::CacheStore,
        types::{extraction_record::ExtractionRecord, index_entry::IndexEntry},
    },
};
use tracing::debug;

use crate::{
    envelope::EnvelopeParser,
    fetcher::{FetchError, RecordFetcher},
};

#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch_record(&self, entry: &IndexEntry, bucket: &str) -> Result<Bytes, FetchError>;

    async fn extract_content(&self, record: Bytes) -> Result<String, AppError>;

    async fn persist_record(
        &self,
        bucket: &str,
        record: ExtractionRecord,
    ) -> Result<(), AppError>;
}

pub struct DefaultPipelineServices {
    fetcher: RecordFetcher,
    parser: Arc<EnvelopeParser>,
    cache: Arc<CacheStore>,
    max_hot_log_lines: usize,
}

impl DefaultPipelineServices {
    pub fn new(
        fetcher: RecordFetcher,
        parser: EnvelopeParser,
        cache: Arc<CacheStore>,
        max_hot_log_lines: usize,
    ) -> Self {
        Self {
            fetcher,
            parser: Arc::new(parser),
            cache,
            max_hot_log_lines,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch_record(&self, entry: &IndexEntry, bucket: &str) -> Result<Bytes, FetchError> {
        self.fetcher.fetch(entry, bucket).await
    }

    async fn extract_content(&self, record: Bytes) -> Result<String, AppError> {
        let parser = Arc::clone(&self.parser);
        let content = tokio::task::spawn_blocking(move || parser.parse(&record)).await?;
        Ok(content)
    }

    async fn persist_record(
        &self,
        bucket: &str,
        record: ExtractionRecord,
    ) -> Result<(), AppError> {
        let identity_key = record.identity_key.clone();
        if self.cache.append(bucket, vec![record]).await == 0 {
            return Err(AppError::Processing(format!(
                "record {identity_key} was not written to bucket {bucket}"
            )));
        }

        if let Some(path) = self.cache.compact(bucket, self.max_hot_log_lines).await {
            debug!(bucket, path = %path.display(), "hot log compacted after append");
        }
        Ok(())
    }
}
