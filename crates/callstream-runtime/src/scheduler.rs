//! Bounded concurrent scheduler for independent units of work.
//!
//! # Design
//! - Every unit is spawned onto a `JoinSet` up front and waits on a shared
//!   semaphore permit, so at most `concurrency` units run at once and admission
//!   is first-come first-served.
//! - Unit errors and panics are captured per index and never cancel siblings.
//! - An optional overall deadline aborts whatever is still pending; those
//!   units are reported as timed out rather than restarted.
//! - Results are returned ordered by input index, one per input.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use callstream_telemetry::Metrics;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Why a scheduled unit produced no value.
#[derive(Debug)]
pub enum TaskFailure<E> {
    /// The unit returned an error.
    Error(E),
    /// The unit panicked.
    Panicked {
        /// Panic payload rendered as text.
        message: String,
    },
    /// The unit was cancelled before completing.
    Cancelled,
    /// The unit was abandoned when the batch deadline elapsed.
    TimedOut {
        /// Batch deadline.
        after: Duration,
    },
}

impl<E> TaskFailure<E> {
    /// Label used for the `scheduled_tasks_total` status dimension.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Error(_) => "failed",
            Self::Panicked { .. } => "panicked",
            Self::Cancelled => "cancelled",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    /// The unit's own error, if it returned one.
    #[must_use]
    pub const fn as_error(&self) -> Option<&E> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// Convert the unit's error type, keeping scheduler-side failures as they are.
    pub fn map_err<F, O>(self, op: O) -> TaskFailure<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            Self::Error(err) => TaskFailure::Error(op(err)),
            Self::Panicked { message } => TaskFailure::Panicked { message },
            Self::Cancelled => TaskFailure::Cancelled,
            Self::TimedOut { after } => TaskFailure::TimedOut { after },
        }
    }
}

impl<E: fmt::Display> fmt::Display for TaskFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => write!(f, "{err}"),
            Self::Panicked { message } => write!(f, "task panicked: {message}"),
            Self::Cancelled => f.write_str("task cancelled"),
            Self::TimedOut { after } => write!(f, "task abandoned after {}s", after.as_secs()),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for TaskFailure<E> {}

/// Outcome of one scheduled unit, tagged with its input position.
#[derive(Debug)]
pub struct TaskResult<T, E> {
    /// Zero-based position of the unit in the input.
    pub index: usize,
    /// Value or captured failure.
    pub outcome: Result<T, TaskFailure<E>>,
}

impl<T, E> TaskResult<T, E> {
    /// Whether the unit produced a value.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Every unit's result plus wall-clock time for the batch.
#[derive(Debug)]
pub struct BatchReport<T, E> {
    results: Vec<TaskResult<T, E>>,
    elapsed: Duration,
}

impl<T, E> BatchReport<T, E> {
    pub(crate) const fn new(results: Vec<TaskResult<T, E>>, elapsed: Duration) -> Self {
        Self { results, elapsed }
    }

    /// Results ordered by input index.
    #[must_use]
    pub fn results(&self) -> &[TaskResult<T, E>] {
        &self.results
    }

    /// Successful values with their input index.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &T)> {
        self.results
            .iter()
            .filter_map(|result| result.outcome.as_ref().ok().map(|value| (result.index, value)))
    }

    /// Failures with their input index.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &TaskFailure<E>)> {
        self.results
            .iter()
            .filter_map(|result| result.outcome.as_ref().err().map(|err| (result.index, err)))
    }

    /// Number of units that produced a value.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.results.iter().filter(|result| result.is_success()).count()
    }

    /// Number of units that failed for any reason.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.results.len() - self.success_count()
    }

    /// Number of units scheduled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch was empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Wall-clock time from first spawn to last result.
    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Consume the report, yielding results ordered by input index.
    #[must_use]
    pub fn into_results(self) -> Vec<TaskResult<T, E>> {
        self.results
    }

    /// Consume the report, yielding bare outcomes ordered by input index.
    #[must_use]
    pub fn into_outcomes(self) -> Vec<Result<T, TaskFailure<E>>> {
        self.results.into_iter().map(|result| result.outcome).collect()
    }
}

type Slot<T, E> = Option<Result<T, TaskFailure<E>>>;

/// Runs units of work with a concurrency cap and optional batch deadline.
#[derive(Clone)]
pub struct TaskScheduler {
    concurrency: usize,
    timeout: Option<Duration>,
    metrics: Option<Metrics>,
}

impl TaskScheduler {
    /// Scheduler admitting at most `concurrency` units at once (minimum one).
    #[must_use]
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout: None,
            metrics: None,
        }
    }

    /// Report admissions and outcomes to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Abandon units still pending once `timeout` has elapsed.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Configured concurrency cap.
    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `work` over every item and collect one result per item.
    ///
    /// `work` receives the item's input index alongside the item.
    pub async fn run<I, T, E, F, Fut>(&self, items: Vec<I>, work: F) -> BatchReport<T, E>
    where
        I: Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(usize, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let started = Instant::now();
        let total = items.len();
        let mut slots: Vec<Slot<T, E>> = std::iter::repeat_with(|| None).take(total).collect();
        if total == 0 {
            return BatchReport::new(Vec::new(), started.elapsed());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let work = Arc::new(work);
        let mut set = JoinSet::new();
        let mut indices = HashMap::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let work = Arc::clone(&work);
            let metrics = self.metrics.clone();
            let handle = set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| TaskFailure::Cancelled)?;
                let _guard = InFlightGuard::admit(metrics);
                work(index, item).await.map_err(TaskFailure::Error)
            });
            indices.insert(handle.id(), index);
        }
        debug!(total, concurrency = self.concurrency, "scheduled batch");

        let finished = {
            let collect = collect(&mut set, &indices, &mut slots, self.metrics.as_ref(), None);
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, collect).await.is_ok(),
                None => {
                    collect.await;
                    true
                }
            }
        };

        if !finished && let Some(limit) = self.timeout {
            set.abort_all();
            collect(
                &mut set,
                &indices,
                &mut slots,
                self.metrics.as_ref(),
                Some(limit),
            )
            .await;
            let mut abandoned = 0_usize;
            for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
                abandoned += 1;
                *slot = Some(Err(TaskFailure::TimedOut { after: limit }));
                if let Some(metrics) = &self.metrics {
                    metrics.inc_scheduled_task("timed_out");
                }
            }
            warn!(
                total,
                abandoned,
                timeout_secs = limit.as_secs(),
                "batch deadline elapsed; pending units abandoned"
            );
        }

        let results = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| TaskResult {
                index,
                outcome: slot.unwrap_or(Err(TaskFailure::Cancelled)),
            })
            .collect();
        BatchReport::new(results, started.elapsed())
    }
}

/// Drain `set`, storing each outcome at its input index.
///
/// When `aborted_after` is set the set has been aborted, so cancellations are
/// left empty for the caller to mark as timed out.
async fn collect<T, E>(
    set: &mut JoinSet<Result<T, TaskFailure<E>>>,
    indices: &HashMap<Id, usize>,
    slots: &mut [Slot<T, E>],
    metrics: Option<&Metrics>,
    aborted_after: Option<Duration>,
) where
    T: Send + 'static,
    E: Send + 'static,
{
    while let Some(joined) = set.join_next_with_id().await {
        let (id, outcome) = match joined {
            Ok((id, outcome)) => (id, outcome),
            Err(err) if err.is_cancelled() && aborted_after.is_some() => continue,
            Err(err) => (err.id(), Err(join_failure(err))),
        };
        let Some(slot) = indices.get(&id).and_then(|index| slots.get_mut(*index)) else {
            continue;
        };
        if let Some(metrics) = metrics {
            let status = match &outcome {
                Ok(_) => "succeeded",
                Err(failure) => failure.status(),
            };
            metrics.inc_scheduled_task(status);
        }
        if let Err(TaskFailure::Panicked { message }) = &outcome {
            warn!(%message, "scheduled unit panicked");
        }
        *slot = Some(outcome);
    }
}

fn join_failure<E>(err: JoinError) -> TaskFailure<E> {
    if err.is_panic() {
        TaskFailure::Panicked {
            message: panic_message(err.into_panic()),
        }
    } else {
        TaskFailure::Cancelled
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Keeps the in-flight gauge balanced on every exit path, including panics.
struct InFlightGuard {
    metrics: Option<Metrics>,
}

impl InFlightGuard {
    fn admit(metrics: Option<Metrics>) -> Self {
        if let Some(metrics) = &metrics {
            metrics.task_admitted();
        }
        Self { metrics }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            metrics.task_released();
        }
    }
}
