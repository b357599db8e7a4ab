//! Chunked scheduling for large worklists.
//!
//! Items are split into fixed-size chunks kept in input order. Chunks run
//! through an outer scheduler while each chunk runs its items through an
//! inner one, so at most `chunk_concurrency * item_concurrency` items are in
//! flight. Results are flattened back into input order.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use callstream_telemetry::Metrics;
use tokio::time::Instant;
use tracing::debug;

use crate::scheduler::{BatchReport, TaskFailure, TaskResult, TaskScheduler};

/// Splits a worklist into chunks and schedules them two levels deep.
#[derive(Clone)]
pub struct BatchSplitter {
    chunk_size: usize,
    chunk_concurrency: usize,
    item_concurrency: usize,
    metrics: Option<Metrics>,
    timeout: Option<Duration>,
}

impl BatchSplitter {
    /// Splitter with the given chunk size and concurrency caps (each at least one).
    #[must_use]
    pub fn new(chunk_size: usize, chunk_concurrency: usize, item_concurrency: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_concurrency: chunk_concurrency.max(1),
            item_concurrency: item_concurrency.max(1),
            metrics: None,
            timeout: None,
        }
    }

    /// Report per-item scheduling to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Abandon items still pending once `timeout` has elapsed for the whole run.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of chunks `len` items split into.
    #[must_use]
    pub const fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }

    /// Upper bound on items running at once.
    #[must_use]
    pub const fn max_in_flight(&self) -> usize {
        self.chunk_concurrency.saturating_mul(self.item_concurrency)
    }

    /// Run `work` over every item, returning one result per item in input order.
    ///
    /// `work` receives the item's index in the full worklist.
    pub async fn run<I, T, E, F, Fut>(&self, items: Vec<I>, work: F) -> BatchReport<T, E>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(usize, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let started = Instant::now();
        let run_limit = self.timeout;
        let deadline = run_limit.map(|limit| started + limit);
        let chunks = split(items, self.chunk_size);
        let chunk_lens: Vec<usize> = chunks.iter().map(|(_, chunk)| chunk.len()).collect();
        debug!(
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            chunk_concurrency = self.chunk_concurrency,
            item_concurrency = self.item_concurrency,
            "splitting worklist"
        );

        let work = Arc::new(work);
        let mut inner = TaskScheduler::new(self.item_concurrency);
        if let Some(metrics) = &self.metrics {
            inner = inner.with_metrics(metrics.clone());
        }

        let chunk_report = TaskScheduler::new(self.chunk_concurrency)
            .run(chunks, move |_, (offset, chunk): (usize, Vec<I>)| {
                let work = Arc::clone(&work);
                let mut inner = inner.clone();
                if let Some(deadline) = deadline {
                    inner = inner.with_timeout(deadline.saturating_duration_since(Instant::now()));
                }
                async move {
                    let report = inner
                        .run(chunk, move |index, item| work(offset + index, item))
                        .await;
                    Ok::<_, Infallible>(report.into_outcomes())
                }
            })
            .await;

        let mut results = Vec::with_capacity(chunk_lens.iter().sum());
        for (outcome, len) in chunk_report.into_outcomes().into_iter().zip(chunk_lens) {
            match outcome {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        results.push(TaskResult {
                            index: results.len(),
                            outcome: outcome.map_err(|failure| with_run_limit(failure, run_limit)),
                        });
                    }
                }
                Err(failure) => {
                    for _ in 0..len {
                        let replicated = replicate(&failure);
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_scheduled_task(replicated.status());
                        }
                        results.push(TaskResult {
                            index: results.len(),
                            outcome: Err(replicated),
                        });
                    }
                }
            }
        }
        BatchReport::new(results, started.elapsed())
    }
}

/// Inner deadlines are what remained of the run when each chunk started;
/// report the run-level limit instead.
fn with_run_limit<E>(failure: TaskFailure<E>, run_limit: Option<Duration>) -> TaskFailure<E> {
    match (failure, run_limit) {
        (TaskFailure::TimedOut { .. }, Some(limit)) => TaskFailure::TimedOut { after: limit },
        (failure, _) => failure,
    }
}

fn split<I>(items: Vec<I>, chunk_size: usize) -> Vec<(usize, Vec<I>)> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut remaining = items.into_iter();
    let mut offset = 0;
    loop {
        let chunk: Vec<I> = remaining.by_ref().take(chunk_size).collect();
        if chunk.is_empty() {
            break;
        }
        let len = chunk.len();
        chunks.push((offset, chunk));
        offset += len;
    }
    chunks
}

fn replicate<E>(failure: &TaskFailure<Infallible>) -> TaskFailure<E> {
    match failure {
        TaskFailure::Error(never) => match *never {},
        TaskFailure::Panicked { message } => TaskFailure::Panicked {
            message: message.clone(),
        },
        TaskFailure::Cancelled => TaskFailure::Cancelled,
        TaskFailure::TimedOut { after } => TaskFailure::TimedOut { after: *after },
    }
}
