use std::{any::Any, fmt::Display, future::Future, panic::AssertUnwindSafe};

use futures::{stream, FutureExt, StreamExt};
use tracing::{debug, error, warn};

/// Bounded fan-out over a list of work items.
///
/// With a worker count of zero items run one after another in input order.
/// Otherwise at most `worker_count` items are in flight and results arrive in
/// completion order. A failing or panicking item is logged and left out of
/// the results; it never stops the other items.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Self {
        Self { worker_count }
    }

    /// Run `work` over every item, collecting one result per successful item.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: Display,
    {
        self.run_flat(items, |item| work(item).map(|res| res.map(std::iter::once)))
            .await
    }

    /// Like [`WorkerPool::run`], but each item may yield any number of results.
    pub async fn run_flat<T, I, E, F, Fut>(&self, items: Vec<T>, work: F) -> Vec<I::Item>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<I, E>>,
        I: IntoIterator,
        E: Display,
    {
        let total = items.len();

        let outcomes: Vec<Option<I>> = if self.worker_count == 0 {
            let mut outcomes = Vec::with_capacity(total);
            for (index, item) in items.into_iter().enumerate() {
                outcomes.push(isolate(index, work(item)).await);
            }
            outcomes
        } else {
            stream::iter(items.into_iter().enumerate())
                .map(|(index, item)| isolate(index, work(item)))
                .buffer_unordered(self.worker_count)
                .collect()
                .await
        };

        let mut failed = 0usize;
        let mut results = Vec::new();
        for outcome in outcomes {
            match outcome {
                Some(produced) => results.extend(produced),
                None => failed = failed.saturating_add(1),
            }
        }

        debug!(
            total,
            failed,
            results = results.len(),
            worker_count = self.worker_count,
            "worker pool drained"
        );
        results
    }
}

async fn isolate<I, E, Fut>(index: usize, work: Fut) -> Option<I>
where
    Fut: Future<Output = Result<I, E>>,
    E: Display,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(Ok(produced)) => Some(produced),
        Ok(Err(err)) => {
            warn!(index, error = %err, "work item failed");
            None
        }
        Err(payload) => {
            error!(index, panic = %panic_message(payload.as_ref()), "work item panicked");
            None
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
