//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Each registry is private to its `Metrics` value; tests build their own
//!   instead of sharing process-wide state.
//! - Exposes the counters the orchestration core needs: retries, scheduled
//!   tasks, pipeline steps, and ingestion outcome classification.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the pipeline.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    retry_attempts_total: IntCounterVec,
    scheduled_tasks_total: IntCounterVec,
    tasks_in_flight: IntGauge,
    pipeline_steps_total: IntCounterVec,
    ingest_outcomes_total: IntCounterVec,
    ingest_quota_retries_total: IntCounter,
    ingest_metadata_fallback_total: IntCounter,
    unparsed_duplicate_messages_total: IntCounter,
    events_emitted_total: IntCounterVec,
    last_run_duration_ms: IntGauge,
}

/// Snapshot of selected gauges and counters for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Units currently holding a scheduler permit.
    pub tasks_in_flight: i64,
    /// Submissions retried because the backend quota was exhausted.
    pub ingest_quota_retries_total: u64,
    /// Operations whose metadata could not be decoded.
    pub ingest_metadata_fallback_total: u64,
    /// Error messages mentioning duplicates that the adapter could not parse.
    pub unparsed_duplicate_messages_total: u64,
    /// Duration of the most recent run in milliseconds.
    pub last_run_duration_ms: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let retry_attempts_total = counter_vec(
            "retry_attempts_total",
            "Attempts made by the retry wrapper by operation and outcome",
            &["operation", "outcome"],
        )?;
        let scheduled_tasks_total = counter_vec(
            "scheduled_tasks_total",
            "Units completed by the concurrent scheduler by status",
            &["status"],
        )?;
        let tasks_in_flight = IntGauge::with_opts(Opts::new(
            "tasks_in_flight",
            "Units currently holding a scheduler permit",
        ))
        .map_err(|source| collector_error("tasks_in_flight", source))?;
        let pipeline_steps_total = counter_vec(
            "pipeline_steps_total",
            "Per-file pipeline steps executed by status",
            &["step", "status"],
        )?;
        let ingest_outcomes_total = counter_vec(
            "ingest_outcomes_total",
            "Classified bulk ingestion outcomes by kind",
            &["kind"],
        )?;
        let ingest_quota_retries_total = counter(
            "ingest_quota_retries_total",
            "Bulk submissions retried after a quota rejection",
        )?;
        let ingest_metadata_fallback_total = counter(
            "ingest_metadata_fallback_total",
            "Operations whose metadata fell back to the single-success assumption",
        )?;
        let unparsed_duplicate_messages_total = counter(
            "unparsed_duplicate_messages_total",
            "Duplicate-looking error messages the adapter could not parse",
        )?;
        let events_emitted_total = counter_vec(
            "events_emitted_total",
            "Run events emitted by type",
            &["type"],
        )?;
        let last_run_duration_ms = IntGauge::with_opts(Opts::new(
            "last_run_duration_ms",
            "Wall-clock duration of the most recent run (ms)",
        ))
        .map_err(|source| collector_error("last_run_duration_ms", source))?;

        register(&registry, "retry_attempts_total", &retry_attempts_total)?;
        register(&registry, "scheduled_tasks_total", &scheduled_tasks_total)?;
        register(&registry, "tasks_in_flight", &tasks_in_flight)?;
        register(&registry, "pipeline_steps_total", &pipeline_steps_total)?;
        register(&registry, "ingest_outcomes_total", &ingest_outcomes_total)?;
        register(
            &registry,
            "ingest_quota_retries_total",
            &ingest_quota_retries_total,
        )?;
        register(
            &registry,
            "ingest_metadata_fallback_total",
            &ingest_metadata_fallback_total,
        )?;
        register(
            &registry,
            "unparsed_duplicate_messages_total",
            &unparsed_duplicate_messages_total,
        )?;
        register(&registry, "events_emitted_total", &events_emitted_total)?;
        register(&registry, "last_run_duration_ms", &last_run_duration_ms)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                retry_attempts_total,
                scheduled_tasks_total,
                tasks_in_flight,
                pipeline_steps_total,
                ingest_outcomes_total,
                ingest_quota_retries_total,
                ingest_metadata_fallback_total,
                unparsed_duplicate_messages_total,
                events_emitted_total,
                last_run_duration_ms,
            }),
        })
    }

    /// Record one retry-wrapper attempt.
    pub fn inc_retry_attempt(&self, operation: &str, outcome: &str) {
        self.inner
            .retry_attempts_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    /// Attempts recorded for `operation` with `outcome`.
    #[must_use]
    pub fn retry_attempts(&self, operation: &str, outcome: &str) -> u64 {
        self.inner
            .retry_attempts_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Record a scheduler unit reaching a terminal status.
    pub fn inc_scheduled_task(&self, status: &str) {
        self.inner
            .scheduled_tasks_total
            .with_label_values(&[status])
            .inc();
    }

    /// Units recorded with the given terminal status.
    #[must_use]
    pub fn scheduled_tasks(&self, status: &str) -> u64 {
        self.inner
            .scheduled_tasks_total
            .with_label_values(&[status])
            .get()
    }

    /// A unit acquired a scheduler permit.
    pub fn task_admitted(&self) {
        self.inner.tasks_in_flight.inc();
    }

    /// A unit released its scheduler permit.
    pub fn task_released(&self) {
        self.inner.tasks_in_flight.dec();
    }

    /// Increment the per-file pipeline step counter.
    pub fn inc_pipeline_step(&self, step: &str, status: &str) {
        self.inner
            .pipeline_steps_total
            .with_label_values(&[step, status])
            .inc();
    }

    /// Steps recorded for `step` with `status`.
    #[must_use]
    pub fn pipeline_steps(&self, step: &str, status: &str) -> u64 {
        self.inner
            .pipeline_steps_total
            .with_label_values(&[step, status])
            .get()
    }

    /// Record a classified ingestion outcome.
    pub fn inc_ingest_outcome(&self, kind: &str) {
        self.inner
            .ingest_outcomes_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Outcomes recorded for `kind`.
    #[must_use]
    pub fn ingest_outcomes(&self, kind: &str) -> u64 {
        self.inner
            .ingest_outcomes_total
            .with_label_values(&[kind])
            .get()
    }

    /// Record a submission retried after a quota rejection.
    pub fn inc_quota_retry(&self) {
        self.inner.ingest_quota_retries_total.inc();
    }

    /// Record that operation metadata fell back to the default assumption.
    pub fn inc_metadata_fallback(&self) {
        self.inner.ingest_metadata_fallback_total.inc();
    }

    /// Record a duplicate-looking message that could not be parsed.
    pub fn inc_unparsed_duplicate_message(&self) {
        self.inner.unparsed_duplicate_messages_total.inc();
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Record the wall-clock duration of a finished run.
    pub fn observe_run_duration(&self, duration: Duration) {
        self.inner
            .last_run_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_in_flight: self.inner.tasks_in_flight.get(),
            ingest_quota_retries_total: self.inner.ingest_quota_retries_total.get(),
            ingest_metadata_fallback_total: self.inner.ingest_metadata_fallback_total.get(),
            unparsed_duplicate_messages_total: self
                .inner
                .unparsed_duplicate_messages_total
                .get(),
            last_run_duration_ms: self.inner.last_run_duration_ms.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help)).map_err(|source| collector_error(name, source))
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| collector_error(name, source))
}

const fn collector_error(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
