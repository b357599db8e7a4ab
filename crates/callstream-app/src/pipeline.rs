//! Per-file pipeline driver.
//!
//! # Design
//! - `download -> transcription -> redaction -> formatting -> persist -> upload`;
//!   any stage failure ends the file and records which stages completed.
//! - The driver never retries a stage. Every remote call goes through the
//!   shared [`Retrier`] with the per-call timeout applied to each attempt.
//! - Each stage records `started`/`completed`/`failed` metrics and publishes
//!   `StageCompleted` on success.
//! - The downloaded audio is released on every exit path, including task
//!   cancellation, through [`ArtifactGuard`].
//! - Files run through a [`BatchSplitter`]; statistics are tallied by the
//!   driver after the batch returns, never from inside a task.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use callstream_config::{PipelineConfig, ProcessingSettings};
use callstream_core::{
    BackendError, BackendErrorKind, BackendResult, ConversationFormatter, ConversationRecord,
    IngestionBackend, ObjectStore, RecognitionConfig, RedactedTranscript, RedactionService,
    RedactionSummary, SpeechRecognizer, Transcript, WorkItem,
};
use callstream_events::{Event, EventBus};
use callstream_runtime::{BatchSplitter, Retrier, TaskFailure, with_timeout};
use callstream_telemetry::Metrics;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::adapters::fs_store::hash_file;
use crate::report::RunStatistics;

const DOWNLOAD_OPERATION: &str = "store.download";
const TRANSCRIBE_OPERATION: &str = "recognizer.transcribe";
const INSPECT_OPERATION: &str = "redaction.inspect";
const DEIDENTIFY_OPERATION: &str = "redaction.deidentify";
const METADATA_OPERATION: &str = "store.get_metadata";
const FINGERPRINT_OPERATION: &str = "pipeline.fingerprint";
const PERSIST_OPERATION: &str = "store.upload";
const UPLOAD_OPERATION: &str = "ingest.create_single";
const RECORD_CONTENT_TYPE: &str = "application/json";

/// Stages of the per-file pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Copy the audio to local scratch space.
    Download,
    /// Speech-to-text.
    Transcription,
    /// PII inspection and masking.
    Redaction,
    /// Build the conversation record.
    Formatting,
    /// Write the record to the object store.
    Persist,
    /// Create the conversation in the analytics backend.
    Upload,
}

impl StageKind {
    /// Stable label for logs, metrics, and events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Transcription => "transcription",
            Self::Redaction => "redaction",
            Self::Formatting => "formatting",
            Self::Persist => "persist",
            Self::Upload => "upload",
        }
    }
}

#[derive(Clone, Copy)]
enum StageStatus {
    Started,
    Completed,
    Failed,
}

impl StageStatus {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one file's pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineFileResult {
    /// Store key of the input audio.
    pub source: String,
    /// Stages that finished, in order.
    pub steps_completed: Vec<StageKind>,
    /// Whether every stage finished.
    pub success: bool,
    /// Failure description when `success` is false.
    pub error: Option<String>,
    /// Stage that failed; `None` when the file never reached a stage.
    pub failed_stage: Option<StageKind>,
    /// Backend name of the created conversation.
    pub conversation_id: Option<String>,
    /// URI of the persisted record.
    pub record_uri: Option<String>,
}

impl PipelineFileResult {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            steps_completed: Vec::new(),
            success: false,
            error: None,
            failed_stage: None,
            conversation_id: None,
            record_uri: None,
        }
    }

    /// Result for a file whose task ended before the pipeline could report.
    #[must_use]
    pub fn abandoned(source: &str, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(source)
        }
    }

    /// Last stage that completed.
    #[must_use]
    pub fn last_completed(&self) -> Option<StageKind> {
        self.steps_completed.last().copied()
    }
}

/// Collaborators the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Input and output object store.
    pub store: Arc<dyn ObjectStore>,
    /// Speech-to-text service.
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// PII redaction service.
    pub redactor: Arc<dyn RedactionService>,
    /// Record builder.
    pub formatter: Arc<dyn ConversationFormatter>,
    /// Analytics backend.
    pub backend: Arc<dyn IngestionBackend>,
}

/// Per-run knobs for the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Options passed to the recognizer.
    pub recognition: RecognitionConfig,
    /// Key prefix for persisted records.
    pub output_prefix: String,
    /// Limit applied to every remote call attempt.
    pub call_timeout: Duration,
}

impl PipelineSettings {
    /// Derive pipeline settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            recognition: recognition_config(config),
            output_prefix: config.store.output_prefix.clone(),
            call_timeout: config.processing.call_timeout(),
        }
    }

    /// Output key of the record persisted for `item`.
    #[must_use]
    pub fn record_key(&self, item: &WorkItem) -> String {
        let name = format!("processed_{}.json", item.stem());
        output_key(&self.output_prefix, &name)
    }
}

/// Recognizer options from the configuration.
#[must_use]
pub fn recognition_config(config: &PipelineConfig) -> RecognitionConfig {
    let recognizer = &config.recognizer;
    RecognitionConfig {
        language_code: recognizer.language_code.clone(),
        model: recognizer.model.clone(),
        enable_diarization: recognizer.enable_diarization,
        min_speakers: recognizer.min_speakers,
        max_speakers: recognizer.max_speakers,
        audio_channel_count: recognizer.audio_channel_count,
    }
}

/// Join an output prefix and a file name into a store key.
pub(crate) fn output_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

struct StageFailure {
    stage: StageKind,
    source: BackendError,
}

impl StageFailure {
    fn message(&self) -> String {
        let detail = self.source.detail();
        if detail.is_empty() {
            format!("{}: {}", self.stage.as_str(), self.source)
        } else {
            format!("{}: {}: {detail}", self.stage.as_str(), self.source)
        }
    }
}

struct LocalAudio {
    size_bytes: u64,
    checksum: String,
}

/// Deletes a downloaded file when the pipeline is done with it.
///
/// [`ArtifactGuard::release`] is the normal path. Dropping an armed guard, for
/// example when the task is aborted, schedules the delete on the runtime.
struct ArtifactGuard {
    store: Arc<dyn ObjectStore>,
    path: Option<PathBuf>,
}

impl ArtifactGuard {
    fn new(store: Arc<dyn ObjectStore>, path: PathBuf) -> Self {
        Self {
            store,
            path: Some(path),
        }
    }

    async fn release(mut self) {
        if let Some(path) = self.path.take()
            && let Err(err) = self.store.delete_local(&path).await
        {
            warn!(
                path = %path.display(),
                error = %err,
                detail = err.detail(),
                "failed to release downloaded audio"
            );
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                drop(handle.spawn(async move {
                    if let Err(err) = store.delete_local(&path).await {
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "failed to release abandoned audio"
                        );
                    }
                }));
            }
            Err(_) => {
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to release abandoned audio"
                    );
                }
            }
        }
    }
}

async fn fingerprint(path: &Path) -> BackendResult<LocalAudio> {
    let hashed = path.to_path_buf();
    let (size_bytes, checksum) = tokio::task::spawn_blocking(move || hash_file(&hashed))
        .await
        .map_err(|err| BackendError::transient(FINGERPRINT_OPERATION, err.to_string()))?
        .map_err(|err| BackendError::transient(FINGERPRINT_OPERATION, err.to_string()))?;
    Ok(LocalAudio {
        size_bytes,
        checksum,
    })
}

/// Runs one file through every stage.
#[derive(Clone)]
pub struct FilePipeline {
    collaborators: Collaborators,
    settings: Arc<PipelineSettings>,
    retrier: Retrier,
    metrics: Metrics,
    events: EventBus,
}

impl FilePipeline {
    /// Build a pipeline over `collaborators`.
    #[must_use]
    pub fn new(
        collaborators: Collaborators,
        settings: PipelineSettings,
        retrier: Retrier,
        metrics: Metrics,
        events: EventBus,
    ) -> Self {
        Self {
            collaborators,
            settings: Arc::new(settings),
            retrier,
            metrics,
            events,
        }
    }

    /// Settings in effect.
    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process `item`, converting any stage failure into the returned result.
    pub async fn process(&self, item: WorkItem) -> PipelineFileResult {
        let mut result = PipelineFileResult::new(&item.key);
        let _ = self.events.publish(Event::FileStarted {
            file: item.key.clone(),
        });
        info!(file = %item.key, "processing file");

        let mut artifact = None;
        let outcome = self.run_stages(&item, &mut result, &mut artifact).await;
        if let Some(guard) = artifact {
            guard.release().await;
        }

        match outcome {
            Ok(conversation_id) => {
                result.success = true;
                result.conversation_id = Some(conversation_id.clone());
                let _ = self.events.publish(Event::FileCompleted {
                    file: item.key.clone(),
                    conversation_id: conversation_id.clone(),
                });
                info!(
                    file = %item.key,
                    conversation_id = %conversation_id,
                    "file processing completed"
                );
            }
            Err(failure) => {
                let message = failure.message();
                error!(
                    file = %item.key,
                    stage = failure.stage.as_str(),
                    kind = failure.source.kind().as_str(),
                    error = %message,
                    steps_completed = result.steps_completed.len(),
                    "file processing failed"
                );
                let _ = self.events.publish(Event::FileFailed {
                    file: item.key.clone(),
                    stage: failure.stage.as_str().to_string(),
                    message: message.clone(),
                });
                result.failed_stage = Some(failure.stage);
                result.error = Some(message);
            }
        }
        result
    }

    async fn run_stages(
        &self,
        item: &WorkItem,
        result: &mut PipelineFileResult,
        artifact: &mut Option<ArtifactGuard>,
    ) -> Result<String, StageFailure> {
        let store = &self.collaborators.store;

        let local_path = self
            .execute_stage(item, result, StageKind::Download, async {
                let path = self
                    .call(DOWNLOAD_OPERATION, || store.download(&item.key))
                    .await?;
                *artifact = Some(ArtifactGuard::new(Arc::clone(store), path.clone()));
                Ok::<_, BackendError>(path)
            })
            .await?;

        let audio_uri = store.uri_for(&item.key);
        let transcript = self
            .execute_stage(item, result, StageKind::Transcription, async {
                self.call(TRANSCRIBE_OPERATION, || {
                    self.collaborators
                        .recognizer
                        .transcribe(&audio_uri, &self.settings.recognition)
                })
                .await
            })
            .await?;

        let redacted = self
            .execute_stage(item, result, StageKind::Redaction, self.redact(transcript))
            .await?;

        let record = self
            .execute_stage(item, result, StageKind::Formatting, async {
                let mut metadata = self
                    .call(METADATA_OPERATION, || store.get_metadata(&item.key))
                    .await?;
                if metadata.checksum.is_none() {
                    let local = fingerprint(&local_path).await?;
                    metadata.size_bytes = local.size_bytes;
                    metadata.checksum = Some(local.checksum);
                }
                self.collaborators
                    .formatter
                    .format(item, &redacted, &metadata, Utc::now())
            })
            .await?;

        let record_key = self.settings.record_key(item);
        let record_uri = self
            .execute_stage(item, result, StageKind::Persist, async {
                let body = serde_json::to_vec_pretty(&record).map_err(|err| {
                    BackendError::new(
                        BackendErrorKind::InvalidRequest,
                        "pipeline.serialize_record",
                        err.to_string(),
                    )
                })?;
                self.call(PERSIST_OPERATION, || {
                    store.upload(body.clone(), &record_key, RECORD_CONTENT_TYPE)
                })
                .await
            })
            .await?;
        debug!(file = %item.key, record_uri = %record_uri, "record persisted");
        result.record_uri = Some(record_uri);

        self.execute_stage(item, result, StageKind::Upload, self.upload(&record))
            .await
    }

    async fn redact(&self, transcript: Transcript) -> BackendResult<RedactedTranscript> {
        let redactor = &self.collaborators.redactor;
        let mut findings = Vec::new();
        let mut summary = RedactionSummary {
            fields_processed: 0,
            fields_redacted: 0,
            info_types: BTreeSet::new(),
        };
        let mut redacted = transcript;
        for utterance in &mut redacted.utterances {
            if utterance.text.trim().is_empty() {
                continue;
            }
            let text = utterance.text.clone();
            let found = self
                .call(INSPECT_OPERATION, || redactor.inspect(&text))
                .await?;
            let masked = self
                .call(DEIDENTIFY_OPERATION, || redactor.deidentify(&text))
                .await?;
            summary.fields_processed += 1;
            if masked != text {
                summary.fields_redacted += 1;
            }
            summary
                .info_types
                .extend(found.iter().map(|finding| finding.info_type.clone()));
            findings.extend(found);
            utterance.text = masked;
        }
        debug!(
            fields_processed = summary.fields_processed,
            fields_redacted = summary.fields_redacted,
            info_types = summary.info_types.len(),
            "transcript redacted"
        );
        Ok(RedactedTranscript {
            transcript: redacted,
            findings,
            summary,
        })
    }

    async fn upload(&self, record: &ConversationRecord) -> BackendResult<String> {
        self.call(UPLOAD_OPERATION, || {
            self.collaborators.backend.create_single(record)
        })
        .await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, mut op: F) -> BackendResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        let limit = self.settings.call_timeout;
        self.retrier
            .run(operation, || with_timeout(operation, limit, op()))
            .await
    }

    async fn execute_stage<T, Fut>(
        &self,
        item: &WorkItem,
        result: &mut PipelineFileResult,
        stage: StageKind,
        op: Fut,
    ) -> Result<T, StageFailure>
    where
        Fut: Future<Output = BackendResult<T>>,
    {
        self.record_stage(stage, StageStatus::Started);
        debug!(file = %item.key, stage = stage.as_str(), "stage started");
        match op.await {
            Ok(value) => {
                self.record_stage(stage, StageStatus::Completed);
                result.steps_completed.push(stage);
                let _ = self.events.publish(Event::StageCompleted {
                    file: item.key.clone(),
                    stage: stage.as_str().to_string(),
                });
                Ok(value)
            }
            Err(source) => {
                self.record_stage(stage, StageStatus::Failed);
                Err(StageFailure { stage, source })
            }
        }
    }

    fn record_stage(&self, stage: StageKind, status: StageStatus) {
        self.metrics.inc_pipeline_step(stage.as_str(), status.as_str());
    }
}

/// Drives the manual pipeline over a whole worklist.
pub struct PipelineDriver {
    pipeline: FilePipeline,
    splitter: BatchSplitter,
}

impl PipelineDriver {
    /// Driver running `pipeline` under `splitter`.
    #[must_use]
    pub const fn new(pipeline: FilePipeline, splitter: BatchSplitter) -> Self {
        Self { pipeline, splitter }
    }

    /// Driver whose chunking follows the processing settings.
    ///
    /// Chunks hold `max_concurrent_files` files, each chunk runs its files
    /// concurrently, and `chunk_concurrency` chunks run at once.
    #[must_use]
    pub fn from_settings(
        pipeline: FilePipeline,
        processing: &ProcessingSettings,
        metrics: Metrics,
    ) -> Self {
        let mut splitter = BatchSplitter::new(
            processing.max_concurrent_files,
            processing.chunk_concurrency,
            processing.max_concurrent_files,
        )
        .with_metrics(metrics);
        if let Some(limit) = processing.batch_timeout() {
            splitter = splitter.with_timeout(limit);
        }
        Self::new(pipeline, splitter)
    }

    /// Process every item, returning one result per item in input order.
    ///
    /// `stats` is updated from the collected results once the batch returns.
    pub async fn run(
        &self,
        items: Vec<WorkItem>,
        stats: &mut RunStatistics,
    ) -> Vec<PipelineFileResult> {
        let sources: Vec<String> = items.iter().map(|item| item.key.clone()).collect();
        info!(
            files = items.len(),
            chunks = self.splitter.chunk_count(items.len()),
            max_in_flight = self.splitter.max_in_flight(),
            "processing files in batches"
        );

        let pipeline = self.pipeline.clone();
        let report = self
            .splitter
            .run(items, move |_, item: WorkItem| {
                let pipeline = pipeline.clone();
                async move { Ok::<_, Infallible>(pipeline.process(item).await) }
            })
            .await;

        let results: Vec<PipelineFileResult> = report
            .into_results()
            .into_iter()
            .map(|task| match task.outcome {
                Ok(result) => result,
                Err(failure) => self.abandoned(&sources[task.index], &failure),
            })
            .collect();

        for result in &results {
            stats.record_file(result);
        }
        results
    }

    fn abandoned(&self, source: &str, failure: &TaskFailure<Infallible>) -> PipelineFileResult {
        let message = failure.to_string();
        warn!(
            file = %source,
            status = failure.status(),
            error = %message,
            "file task did not finish"
        );
        let _ = self.pipeline.events.publish(Event::FileFailed {
            file: source.to_string(),
            stage: failure.status().to_string(),
            message: message.clone(),
        });
        PipelineFileResult::abandoned(source, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DefaultConversationFormatter, FormatterSettings};
    use callstream_config::ProcessingMode;
    use callstream_core::BackendErrorKind;
    use callstream_runtime::RetryPolicy;
    use callstream_test_support::fixtures::recognition_config as sample_recognition;
    use callstream_test_support::{
        EchoRedactor, MemoryObjectStore, ScriptedBackend, ScriptedRecognizer,
    };

    struct Harness {
        store: Arc<MemoryObjectStore>,
        recognizer: Arc<ScriptedRecognizer>,
        backend: Arc<ScriptedBackend>,
        metrics: Metrics,
        events: EventBus,
        pipeline: FilePipeline,
    }

    fn harness(recognizer: ScriptedRecognizer) -> anyhow::Result<Harness> {
        let store = Arc::new(MemoryObjectStore::new()?);
        let recognizer = Arc::new(recognizer);
        let backend = Arc::new(ScriptedBackend::new());
        let metrics = Metrics::new()?;
        let events = EventBus::new();
        let collaborators = Collaborators {
            store: store.clone(),
            recognizer: recognizer.clone(),
            redactor: Arc::new(EchoRedactor::new()),
            formatter: Arc::new(DefaultConversationFormatter::new(
                FormatterSettings::default(),
            )),
            backend: backend.clone(),
        };
        let settings = PipelineSettings {
            recognition: sample_recognition(),
            output_prefix: "processed".into(),
            call_timeout: Duration::from_secs(30),
        };
        let retrier = Retrier::new(
            RetryPolicy::new(3, Duration::from_millis(10)),
            metrics.clone(),
        );
        let pipeline = FilePipeline::new(
            collaborators,
            settings,
            retrier,
            metrics.clone(),
            events.clone(),
        );
        Ok(Harness {
            store,
            recognizer,
            backend,
            metrics,
            events,
            pipeline,
        })
    }

    #[tokio::test]
    async fn happy_path_runs_every_stage_and_cleans_up() -> anyhow::Result<()> {
        let h = harness(ScriptedRecognizer::new())?;
        h.store.insert("calls/merged_001.wav", b"RIFF0000WAVE");

        let result = h.pipeline.process(WorkItem::new("calls/merged_001.wav")).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.steps_completed,
            vec![
                StageKind::Download,
                StageKind::Transcription,
                StageKind::Redaction,
                StageKind::Formatting,
                StageKind::Persist,
                StageKind::Upload,
            ]
        );
        assert_eq!(h.store.local_files(), 0);
        assert_eq!(h.store.uploaded_keys(), vec!["processed/processed_merged_001.json"]);

        let created = h.backend.created();
        assert_eq!(created.len(), 1);
        let record = &created[0];
        assert_eq!(record.source_size_bytes, 12);
        assert_eq!(record.source_checksum.as_ref().map(String::len), Some(64));
        assert!(record.segments.iter().all(|segment| !segment.text.contains('5')));
        assert!(record.redaction.info_types.contains("PHONE_NUMBER"));
        assert_eq!(
            result.conversation_id,
            Some(format!("conversations/{}", record.conversation_id))
        );

        assert_eq!(h.metrics.pipeline_steps("upload", "completed"), 1);
        assert_eq!(h.metrics.pipeline_steps("download", "started"), 1);
        let kinds: Vec<&str> = h
            .events
            .backlog_since(0)
            .iter()
            .map(|env| env.event.kind())
            .collect();
        assert_eq!(kinds.first(), Some(&"file_started"));
        assert_eq!(kinds.last(), Some(&"file_completed"));
        assert_eq!(kinds.iter().filter(|kind| **kind == "stage_completed").count(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn transcription_failure_records_stage_and_releases_audio() -> anyhow::Result<()> {
        let recognizer = ScriptedRecognizer::new();
        recognizer.fail_always("merged_002", BackendErrorKind::PermissionDenied);
        let h = harness(recognizer)?;
        h.store.insert("calls/merged_002.wav", b"RIFF");

        let result = h.pipeline.process(WorkItem::new("calls/merged_002.wav")).await;

        assert!(!result.success);
        assert_eq!(result.steps_completed, vec![StageKind::Download]);
        assert_eq!(result.failed_stage, Some(StageKind::Transcription));
        assert!(
            result
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with("transcription: backend permission denied"))
        );
        assert_eq!(h.recognizer.calls(), 1);
        assert_eq!(h.store.local_files(), 0);
        assert!(h.backend.created().is_empty());
        assert_eq!(h.metrics.pipeline_steps("transcription", "failed"), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_inside_the_stage() -> anyhow::Result<()> {
        let recognizer = ScriptedRecognizer::new();
        recognizer.fail_times("merged_003", BackendErrorKind::Transient, 2);
        let h = harness(recognizer)?;
        h.store.insert("calls/merged_003.wav", b"RIFF");

        let result = h.pipeline.process(WorkItem::new("calls/merged_003.wav")).await;

        assert!(result.success);
        assert_eq!(h.recognizer.calls(), 3);
        assert_eq!(h.metrics.retry_attempts(TRANSCRIBE_OPERATION, "retry"), 2);
        assert_eq!(h.metrics.pipeline_steps("transcription", "started"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn missing_metadata_fails_formatting() -> anyhow::Result<()> {
        let h = harness(ScriptedRecognizer::new())?;
        h.store.insert("calls/merged_004.wav", b"RIFF");
        h.store.hide_metadata("calls/merged_004.wav");

        let result = h.pipeline.process(WorkItem::new("calls/merged_004.wav")).await;

        assert_eq!(result.failed_stage, Some(StageKind::Formatting));
        assert_eq!(result.last_completed(), Some(StageKind::Redaction));
        assert!(h.store.uploaded_keys().is_empty());
        assert_eq!(h.store.local_files(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn upload_rejection_keeps_persisted_record() -> anyhow::Result<()> {
        let h = harness(ScriptedRecognizer::new())?;
        h.store.insert("calls/merged_005.wav", b"RIFF");
        h.backend.fail_create("merged-005");

        let result = h.pipeline.process(WorkItem::new("calls/merged_005.wav")).await;

        assert_eq!(result.failed_stage, Some(StageKind::Upload));
        assert_eq!(result.last_completed(), Some(StageKind::Persist));
        assert!(result.record_uri.is_some());
        assert!(result.conversation_id.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn driver_accounts_for_every_item() -> anyhow::Result<()> {
        let recognizer = ScriptedRecognizer::new();
        recognizer.fail_always("merged_1", BackendErrorKind::InvalidRequest);
        let h = harness(recognizer)?;
        let items: Vec<WorkItem> = (0..4)
            .map(|i| {
                let key = format!("calls/merged_{i}.wav");
                h.store.insert(&key, b"RIFF");
                WorkItem::new(key)
            })
            .collect();
        let driver = PipelineDriver::new(h.pipeline.clone(), BatchSplitter::new(2, 2, 2));
        let mut stats = RunStatistics::new(ProcessingMode::Manual);

        let results = driver.run(items, &mut stats).await;

        let sources: Vec<&str> = results.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(
            sources,
            vec![
                "calls/merged_0.wav",
                "calls/merged_1.wav",
                "calls/merged_2.wav",
                "calls/merged_3.wav"
            ]
        );
        assert_eq!(stats.files_processed, 3);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.conversations_uploaded, 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn batch_deadline_abandons_slow_files() -> anyhow::Result<()> {
        let h = harness(ScriptedRecognizer::new().with_latency(Duration::from_secs(60)))?;
        h.store.insert("calls/merged_slow.wav", b"RIFF");
        let driver = PipelineDriver::new(
            h.pipeline.clone(),
            BatchSplitter::new(1, 1, 1).with_timeout(Duration::from_secs(5)),
        );
        let mut stats = RunStatistics::new(ProcessingMode::Manual);

        let results = driver
            .run(vec![WorkItem::new("calls/merged_slow.wav")], &mut stats)
            .await;

        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert_eq!(results[0].failed_stage, None);
        assert_eq!(stats.files_failed, 1);
        // The abandoned download is released by the guard's drop hook.
        for _ in 0..1_000 {
            if h.store.local_files() == 0 {
                break;
            }
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.store.local_files(), 0);
        Ok(())
    }

    #[test]
    fn record_key_joins_prefix() {
        let mut settings = PipelineSettings {
            recognition: sample_recognition(),
            output_prefix: "processed/".into(),
            call_timeout: Duration::from_secs(1),
        };
        let item = WorkItem::new("calls/merged_9.wav");
        assert_eq!(settings.record_key(&item), "processed/processed_merged_9.json");
        settings.output_prefix.clear();
        assert_eq!(settings.record_key(&item), "processed_merged_9.json");
    }
}
