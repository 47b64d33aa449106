use bytes::Bytes;
use common::{
    error::AppError,
    storage::types::{extraction_record::ExtractionRecord, index_entry::IndexEntry},
};
use thiserror::Error;
use tracing::{error, warn};

use super::services::PipelineServices;
use crate::fetcher::FetchError;

#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    App(#[from] AppError),
}

impl StageError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fetch(err) if err.is_fatal())
    }
}

pub struct ItemContext<'a> {
    pub bucket: &'a str,
    pub identity_key: String,
    pub entry: &'a IndexEntry,
    pub services: &'a dyn PipelineServices,
    pub raw: Option<Bytes>,
    pub record: Option<ExtractionRecord>,
}

impl<'a> ItemContext<'a> {
    pub fn new(bucket: &'a str, entry: &'a IndexEntry, services: &'a dyn PipelineServices) -> Self {
        Self {
            bucket,
            identity_key: entry.identity_key(),
            entry,
            services,
            raw: None,
            record: None,
        }
    }

    pub fn take_raw(&mut self) -> Result<Bytes, AppError> {
        self.raw.take().ok_or_else(|| {
            AppError::InternalError("fetched record expected to be available for parsing".into())
        })
    }

    pub fn take_record(&mut self) -> Result<ExtractionRecord, AppError> {
        self.record.take().ok_or_else(|| {
            AppError::InternalError("extraction record expected to be available for persistence".into())
        })
    }

    pub fn abort(&self, err: StageError) -> StageError {
        if err.is_fatal() {
            error!(
                bucket = self.bucket,
                identity_key = %self.identity_key,
                error = %err,
                "retrieval halted by fatal error"
            );
        } else {
            warn!(
                bucket = self.bucket,
                identity_key = %self.identity_key,
                error = %err,
                "retrieval item dropped, will be retried on the next run"
            );
        }
        err
    }
}
