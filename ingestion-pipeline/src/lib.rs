#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod envelope;
pub mod fetcher;
pub mod pipeline;
pub mod worker_pool;

#[cfg(test)]
mod test_support;

pub use envelope::{ContentExtractor, EnvelopeParser, PassthroughExtractor, ReadabilityExtractor};
pub use fetcher::{FetchError, FetchErrorKind, RecordFetcher};
pub use pipeline::{RetrievalConfig, RetrievalPipeline, RetrievalTuning, RunReport};
pub use worker_pool::WorkerPool;
