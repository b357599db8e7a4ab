//! Direct ingestion: the backend transcribes and ingests the audio itself.

use std::sync::Arc;

use callstream_config::{IngestSettings, PipelineConfig};
use callstream_core::{IngestRequest, IngestionBackend, ObjectStore, WorkItem};
use callstream_events::EventBus;
use callstream_runtime::{IngestOutcome, LroMonitor, LroSettings, Retrier};
use callstream_telemetry::Metrics;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::report::RunStatistics;

/// Fully qualified recognizer resource name.
#[must_use]
pub fn recognizer_path(project: &str, location: &str, recognizer_id: &str) -> String {
    format!("projects/{project}/locations/{location}/recognizers/{recognizer_id}")
}

/// Monitor timing taken from the ingestion settings.
#[must_use]
pub const fn lro_settings(settings: &IngestSettings) -> LroSettings {
    LroSettings {
        timeout: settings.lro_timeout(),
        poll_interval: settings.poll_interval(),
        quota_initial_delay: settings.quota_initial_delay(),
        quota_max_delay: settings.quota_max_delay(),
        quota_max_attempts: settings.quota_max_attempts,
    }
}

/// Request template for one bulk submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectSettings {
    /// Recognizer resource the backend transcribes with.
    pub recognizer: String,
    /// BCP-47 language code.
    pub language_code: String,
    /// Agent identifier.
    pub agent_id: String,
    /// Customer identifier.
    pub customer_id: String,
    /// Channel carrying the agent.
    pub agent_channel: u32,
    /// Channel carrying the customer.
    pub customer_channel: u32,
    /// Days before the backend may delete the conversations.
    pub ttl_days: u32,
}

impl DirectSettings {
    /// Template built from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            recognizer: recognizer_path(
                &config.project_id,
                &config.recognizer.location,
                &config.recognizer.recognizer_id,
            ),
            language_code: config.recognizer.language_code.clone(),
            agent_id: config.ingest.agent_id.clone(),
            customer_id: config.ingest.customer_id.clone(),
            agent_channel: config.ingest.agent_channel,
            customer_channel: config.ingest.customer_channel,
            ttl_days: config.ingest.ttl_days,
        }
    }
}

/// Build the bulk request covering `items`.
#[must_use]
pub fn build_request(
    store: &dyn ObjectStore,
    items: &[WorkItem],
    settings: &DirectSettings,
) -> IngestRequest {
    IngestRequest {
        object_uris: items.iter().map(|item| store.uri_for(&item.key)).collect(),
        recognizer: settings.recognizer.clone(),
        language_code: settings.language_code.clone(),
        agent_id: settings.agent_id.clone(),
        customer_id: settings.customer_id.clone(),
        agent_channel: settings.agent_channel,
        customer_channel: settings.customer_channel,
        ttl_days: settings.ttl_days,
    }
}

/// Hands the whole worklist to the backend in one monitored operation.
pub struct DirectIngestDriver {
    store: Arc<dyn ObjectStore>,
    monitor: LroMonitor,
    settings: DirectSettings,
}

impl DirectIngestDriver {
    /// Driver submitting through `monitor`.
    #[must_use]
    pub const fn new(
        store: Arc<dyn ObjectStore>,
        monitor: LroMonitor,
        settings: DirectSettings,
    ) -> Self {
        Self {
            store,
            monitor,
            settings,
        }
    }

    /// Driver wired from the configuration.
    #[must_use]
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn ObjectStore>,
        backend: Arc<dyn IngestionBackend>,
        retrier: Retrier,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        let monitor = LroMonitor::new(
            backend,
            retrier,
            lro_settings(&config.ingest),
            metrics,
            events,
        );
        Self::new(store, monitor, DirectSettings::from_config(config))
    }

    /// Submit `items` and fold the classified outcome into `stats`.
    ///
    /// An empty worklist is not submitted and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend denies access, rejects the recognizer,
    /// or keeps reporting quota exhaustion.
    pub async fn run(
        &self,
        items: &[WorkItem],
        stats: &mut RunStatistics,
    ) -> AppResult<Option<IngestOutcome>> {
        if items.is_empty() {
            info!("no audio files to ingest");
            return Ok(None);
        }
        let request = build_request(self.store.as_ref(), items, &self.settings);
        let outcome = self
            .monitor
            .run(&request)
            .await
            .map_err(|err| AppError::ingest("direct.run", err))?;
        stats.record_ingest(&outcome, items.len());
        Ok(Some(outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstream_config::ProcessingMode;
    use callstream_core::{BackendError, BackendErrorKind, OperationStatus};
    use callstream_runtime::{RetryPolicy, RuntimeError};
    use callstream_test_support::{MemoryObjectStore, ScriptedBackend};
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> DirectSettings {
        DirectSettings {
            recognizer: recognizer_path("test-project", "us-central1", "_"),
            language_code: "en-US".into(),
            agent_id: "agent-001".into(),
            customer_id: "customer-001".into(),
            agent_channel: 1,
            customer_channel: 0,
            ttl_days: 365,
        }
    }

    fn driver(backend: Arc<ScriptedBackend>) -> anyhow::Result<DirectIngestDriver> {
        let metrics = Metrics::new()?;
        let retrier = Retrier::new(RetryPolicy::new(2, Duration::from_millis(10)), metrics.clone());
        let monitor = LroMonitor::new(
            backend,
            retrier,
            LroSettings {
                timeout: Duration::from_secs(60),
                poll_interval: Duration::from_secs(1),
                quota_initial_delay: Duration::from_secs(1),
                quota_max_delay: Duration::from_secs(4),
                quota_max_attempts: 2,
            },
            metrics,
            EventBus::new(),
        );
        Ok(DirectIngestDriver::new(
            Arc::new(MemoryObjectStore::new()?),
            monitor,
            settings(),
        ))
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| WorkItem::new(format!("calls/merged_{i}.wav")))
            .collect()
    }

    #[test]
    fn recognizer_path_is_fully_qualified() {
        assert_eq!(
            recognizer_path("acme", "global", "telephony"),
            "projects/acme/locations/global/recognizers/telephony"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn partial_success_updates_statistics() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_poll(Ok(OperationStatus {
            done: true,
            metadata: json!({
                "successful_ingest_count": 2,
                "duplicates_skipped_count": 1,
                "failed_ingest_count": 1,
                "processed_object_count": 4
            }),
            error: None,
        }));
        let driver = driver(backend.clone())?;
        let mut stats = RunStatistics::new(ProcessingMode::Direct);

        let outcome = driver.run(&items(4), &mut stats).await?;

        assert_eq!(outcome.map(|o| o.kind()), Some("partial_success"));
        assert_eq!(stats.files_processed, 3);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.conversations_uploaded, 3);

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].object_uris[0], "mem://calls/merged_0.wav");
        assert_eq!(
            requests[0].recognizer,
            "projects/test-project/locations/us-central1/recognizers/_"
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn empty_worklist_is_not_submitted() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new());
        let driver = driver(backend.clone())?;
        let mut stats = RunStatistics::new(ProcessingMode::Direct);
        assert!(driver.run(&[], &mut stats).await?.is_none());
        assert_eq!(backend.submit_calls(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_fatal() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_submit(Err(BackendError::new(
            BackendErrorKind::PermissionDenied,
            "ingest.submit_bulk",
            "403: caller lacks access",
        )));
        let driver = driver(backend)?;
        let mut stats = RunStatistics::new(ProcessingMode::Direct);

        let err = driver.run(&items(2), &mut stats).await.err();

        assert!(matches!(
            err,
            Some(AppError::Ingest {
                source: RuntimeError::PermissionDenied { .. },
                ..
            })
        ));
        assert_eq!(stats.files_failed, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_every_file() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new());
        let driver = driver(backend)?;
        let mut stats = RunStatistics::new(ProcessingMode::Direct);

        let outcome = driver.run(&items(3), &mut stats).await?;

        assert_eq!(outcome.map(|o| o.kind()), Some("timed_out"));
        assert_eq!(stats.files_failed, 3);
        assert_eq!(stats.files_processed, 0);
        Ok(())
    }
}
