use common::{error::AppError, storage::types::extraction_record::ExtractionRecord};
use state_machines::core::GuardError;
use tracing::{debug, instrument};

use super::{
    context::{ItemContext, StageError},
    state::{Done, Fetching, Parsing, Pending, Persisted, RetrievalMachine},
};

#[instrument(
    level = "trace",
    skip_all,
    fields(bucket = ctx.bucket, identity_key = %ctx.identity_key)
)]
pub fn skip_cached(
    machine: RetrievalMachine<(), Pending>,
    ctx: &ItemContext<'_>,
) -> Result<RetrievalMachine<(), Done>, StageError> {
    debug!(
        bucket = ctx.bucket,
        identity_key = %ctx.identity_key,
        "record already cached"
    );
    machine
        .skip()
        .map_err(|(_, guard)| map_guard_error("skip", &guard).into())
}

#[instrument(
    level = "trace",
    skip_all,
    fields(bucket = ctx.bucket, identity_key = %ctx.identity_key)
)]
pub async fn fetch(
    machine: RetrievalMachine<(), Pending>,
    ctx: &mut ItemContext<'_>,
) -> Result<RetrievalMachine<(), Fetching>, StageError> {
    let machine = machine
        .fetch()
        .map_err(|(_, guard)| map_guard_error("fetch", &guard))?;

    ctx.entry.validate()?;
    let raw = ctx.services.fetch_record(ctx.entry, ctx.bucket).await?;

    debug!(
        bucket = ctx.bucket,
        identity_key = %ctx.identity_key,
        bytes = raw.len(),
        "record fetched"
    );
    ctx.raw = Some(raw);
    Ok(machine)
}

#[instrument(
    level = "trace",
    skip_all,
    fields(bucket = ctx.bucket, identity_key = %ctx.identity_key)
)]
pub async fn parse(
    machine: RetrievalMachine<(), Fetching>,
    ctx: &mut ItemContext<'_>,
) -> Result<RetrievalMachine<(), Parsing>, StageError> {
    let machine = machine
        .parse()
        .map_err(|(_, guard)| map_guard_error("parse", &guard))?;

    let raw = ctx.take_raw()?;
    let content = ctx.services.extract_content(raw).await?;

    debug!(
        bucket = ctx.bucket,
        identity_key = %ctx.identity_key,
        content_chars = content.chars().count(),
        "record parsed"
    );
    ctx.record = Some(ExtractionRecord::new(ctx.identity_key.clone(), content));
    Ok(machine)
}

#[instrument(
    level = "trace",
    skip_all,
    fields(bucket = ctx.bucket, identity_key = %ctx.identity_key)
)]
pub async fn persist(
    machine: RetrievalMachine<(), Parsing>,
    ctx: &mut ItemContext<'_>,
) -> Result<(RetrievalMachine<(), Persisted>, bool), StageError> {
    let record = ctx.take_record()?;
    let empty = record.is_empty();
    ctx.services.persist_record(ctx.bucket, record).await?;

    let machine = machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))?;
    Ok((machine, empty))
}

pub fn finish(
    machine: RetrievalMachine<(), Persisted>,
) -> Result<RetrievalMachine<(), Done>, StageError> {
    machine
        .finish()
        .map_err(|(_, guard)| map_guard_error("finish", &guard).into())
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid retrieval pipeline transition during {event}: {guard:?}"
    ))
}
