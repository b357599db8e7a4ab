//! Bulk ingestion monitor.
//!
//! # Design
//! - `Submitted -> Polling -> {Succeeded | PartialSuccess | AllDuplicates |
//!   Failed | TimedOut}`.
//! - Submission and each poll go through the shared [`Retrier`]. Quota
//!   rejections on submission get their own slower backoff loop because the
//!   backend allows one bulk job per region at a time.
//! - Permission and recognizer errors abort the run with context; any other
//!   submission error is checked for duplicate phrasing before it is treated
//!   as a failure.
//! - Polling is bounded by a wall-clock timeout that yields `TimedOut`, not
//!   `Failed`, so callers can decide to resubmit.

use std::sync::Arc;
use std::time::Duration;

use callstream_core::{
    BackendError, BackendErrorKind, IngestRequest, IngestionBackend, OperationHandle,
    OperationStatus,
};
use callstream_events::{Event, EventBus};
use callstream_telemetry::Metrics;
use tracing::{debug, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::outcome::{
    DuplicateParse, IngestOutcome, MetadataSource, classify_counters, decode_counters,
    parse_duplicate_message, partial_errors,
};
use crate::retry::Retrier;

const SUBMIT_OPERATION: &str = "ingest.submit_bulk";
const POLL_OPERATION: &str = "ingest.poll";

/// Timing knobs for one monitored ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LroSettings {
    /// Wall-clock limit for polling.
    pub timeout: Duration,
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Wait after the first quota rejection.
    pub quota_initial_delay: Duration,
    /// Ceiling for any quota wait.
    pub quota_max_delay: Duration,
    /// Submissions attempted before quota exhaustion is fatal.
    pub quota_max_attempts: u32,
}

impl LroSettings {
    /// Wait after quota rejection number `attempt` (1-based).
    #[must_use]
    pub fn quota_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.quota_initial_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.quota_max_delay)
    }
}

impl Default for LroSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            poll_interval: Duration::from_secs(10),
            quota_initial_delay: Duration::from_secs(60),
            quota_max_delay: Duration::from_secs(600),
            quota_max_attempts: 5,
        }
    }
}

/// Lifecycle of a monitored operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LroState {
    /// The submission call returned a handle.
    Submitted,
    /// Waiting for the backend to finish.
    Polling,
    /// Conversations were created without duplicates.
    Succeeded,
    /// Some files were duplicates.
    PartialSuccess,
    /// Every file was a duplicate.
    AllDuplicates,
    /// The operation failed.
    Failed,
    /// Polling gave up.
    TimedOut,
}

impl LroState {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::PartialSuccess => "partial_success",
            Self::AllDuplicates => "all_duplicates",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Whether no further transitions follow.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Submitted | Self::Polling)
    }

    /// Terminal state reached by `outcome`.
    #[must_use]
    pub const fn of(outcome: &IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Succeeded { .. } => Self::Succeeded,
            IngestOutcome::PartialSuccess { .. } => Self::PartialSuccess,
            IngestOutcome::AllDuplicates { .. } => Self::AllDuplicates,
            IngestOutcome::Failed { .. } => Self::Failed,
            IngestOutcome::TimedOut { .. } => Self::TimedOut,
        }
    }
}

enum Submission {
    Accepted(OperationHandle),
    Resolved(IngestOutcome),
}

/// Submits one bulk ingestion and follows it to a classified outcome.
pub struct LroMonitor {
    backend: Arc<dyn IngestionBackend>,
    retrier: Retrier,
    settings: LroSettings,
    metrics: Metrics,
    events: EventBus,
}

impl LroMonitor {
    /// Build a monitor around `backend`.
    #[must_use]
    pub fn new(
        backend: Arc<dyn IngestionBackend>,
        retrier: Retrier,
        settings: LroSettings,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        Self {
            backend,
            retrier,
            settings,
            metrics,
            events,
        }
    }

    /// Submit `request` and wait for the operation to finish.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend denies permission, rejects the
    /// recognizer configuration, or keeps reporting quota exhaustion. Every
    /// other failure is reported as an [`IngestOutcome`].
    pub async fn run(&self, request: &IngestRequest) -> RuntimeResult<IngestOutcome> {
        info!(
            files = request.object_uris.len(),
            recognizer = %request.recognizer,
            "submitting bulk ingestion"
        );
        let outcome = match self.submit(request).await? {
            Submission::Accepted(handle) => {
                debug!(
                    operation = %handle.name,
                    state = LroState::Submitted.as_str(),
                    "operation accepted"
                );
                let _ = self.events.publish(Event::IngestSubmitted {
                    operation: handle.name.clone(),
                });
                self.wait(&handle).await
            }
            Submission::Resolved(outcome) => outcome,
        };

        let counters = outcome.counters();
        self.metrics.inc_ingest_outcome(outcome.kind());
        let _ = self.events.publish(Event::IngestCompleted {
            kind: outcome.kind().to_string(),
            ingested: counters.ingested,
            duplicates: counters.duplicates,
            failed: counters.failed,
        });
        info!(
            state = LroState::of(&outcome).as_str(),
            ingested = counters.ingested,
            duplicates = counters.duplicates,
            failed = counters.failed,
            "bulk ingestion finished"
        );
        Ok(outcome)
    }

    async fn submit(&self, request: &IngestRequest) -> RuntimeResult<Submission> {
        let max_attempts = self.settings.quota_max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self
                .retrier
                .run(SUBMIT_OPERATION, || self.backend.submit_bulk(request))
                .await
            {
                Ok(handle) => return Ok(Submission::Accepted(handle)),
                Err(err) => err,
            };

            match err.kind() {
                BackendErrorKind::QuotaExhausted if attempt < max_attempts => {
                    let delay = self.settings.quota_delay(attempt);
                    self.metrics.inc_quota_retry();
                    warn!(
                        attempt,
                        max_attempts,
                        delay_secs = delay.as_secs(),
                        detail = err.detail(),
                        "bulk ingestion quota exhausted; waiting before resubmitting"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                BackendErrorKind::QuotaExhausted => {
                    return Err(RuntimeError::QuotaExhausted {
                        operation: SUBMIT_OPERATION,
                        attempts: attempt,
                        source: err,
                    });
                }
                BackendErrorKind::PermissionDenied => {
                    warn!(
                        resource = %request.recognizer,
                        detail = err.detail(),
                        "bulk ingestion denied; check access to the recognizer and location"
                    );
                    return Err(RuntimeError::PermissionDenied {
                        operation: SUBMIT_OPERATION,
                        resource: request.recognizer.clone(),
                        source: err,
                    });
                }
                BackendErrorKind::RecognizerConfig => {
                    warn!(
                        recognizer = %request.recognizer,
                        detail = err.detail(),
                        "recognizer rejected; check that it exists in the ingestion location"
                    );
                    return Err(RuntimeError::RecognizerConfig {
                        operation: SUBMIT_OPERATION,
                        recognizer: request.recognizer.clone(),
                        source: err,
                    });
                }
                _ => return Ok(Submission::Resolved(self.classify_error(&err))),
            }
        }
    }

    async fn wait(&self, handle: &OperationHandle) -> IngestOutcome {
        let limit = self.settings.timeout;
        if let Ok(outcome) = tokio::time::timeout(limit, self.poll_until_done(handle)).await {
            outcome
        } else {
            warn!(
                operation = %handle.name,
                timeout_secs = limit.as_secs(),
                "bulk ingestion did not finish in time"
            );
            IngestOutcome::TimedOut {
                operation: handle.name.clone(),
                waited_secs: limit.as_secs(),
            }
        }
    }

    async fn poll_until_done(&self, handle: &OperationHandle) -> IngestOutcome {
        loop {
            match self
                .retrier
                .run(POLL_OPERATION, || self.backend.poll(handle))
                .await
            {
                Ok(status) if status.done => return self.classify_status(&status),
                Ok(_) => {
                    debug!(
                        operation = %handle.name,
                        state = LroState::Polling.as_str(),
                        "operation still running"
                    );
                }
                Err(err) => return self.classify_error(&err),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    fn classify_status(&self, status: &OperationStatus) -> IngestOutcome {
        if let Some(message) = status.error.as_deref() {
            return self.classify_message(message);
        }
        let (counters, source) = decode_counters(&status.metadata);
        if source == MetadataSource::Fallback {
            self.metrics.inc_metadata_fallback();
            warn!("operation metadata not recognised; assuming one conversation was ingested");
        } else {
            debug!(source = source.as_str(), "decoded operation metadata");
        }
        classify_counters(counters, partial_errors(&status.metadata))
    }

    fn classify_error(&self, err: &BackendError) -> IngestOutcome {
        if err.detail().is_empty() {
            IngestOutcome::failure(err.to_string())
        } else {
            self.classify_message(err.detail())
        }
    }

    fn classify_message(&self, message: &str) -> IngestOutcome {
        match parse_duplicate_message(message) {
            DuplicateParse::Matched { duplicates, failed } => {
                info!(duplicates, failed, "backend reported previously ingested files");
                IngestOutcome::from_duplicates(duplicates, failed)
            }
            DuplicateParse::Unparsed => {
                self.metrics.inc_unparsed_duplicate_message();
                warn!(
                    error_text = message,
                    "duplicate-like error text did not match known formats"
                );
                IngestOutcome::failure(message)
            }
            DuplicateParse::NotDuplicate => IngestOutcome::failure(message),
        }
    }
}
