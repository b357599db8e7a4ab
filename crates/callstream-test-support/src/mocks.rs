//! Scripted collaborator fakes.
//!
//! Each fake records what it was asked to do and lets tests inject failures
//! without any network or cloud access.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use callstream_core::{
    BackendError, BackendErrorKind, BackendResult, ConversationRecord, Finding, IngestRequest,
    IngestionBackend, ObjectMetadata, ObjectStore, OperationHandle, OperationStatus,
    RecognitionConfig, RedactionService, SpeechRecognizer, Transcript,
};
use chrono::Utc;
use tempfile::TempDir;

use crate::fixtures::{sample_metadata, sample_transcript};
use crate::probe::InFlightProbe;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory object store that downloads into a private scratch directory.
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    uploads: Mutex<BTreeMap<String, Vec<u8>>>,
    missing_metadata: Mutex<Vec<String>>,
    scratch: TempDir,
    downloads: AtomicUsize,
}

impl MemoryObjectStore {
    /// Empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch directory cannot be created.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(BTreeMap::new()),
            missing_metadata: Mutex::new(Vec::new()),
            scratch: TempDir::new()?,
            downloads: AtomicUsize::new(0),
        })
    }

    /// Add an input object.
    pub fn insert(&self, key: &str, data: &[u8]) {
        lock(&self.objects).insert(key.to_string(), data.to_vec());
    }

    /// Make `get_metadata` report `key` as missing.
    pub fn hide_metadata(&self, key: &str) {
        lock(&self.missing_metadata).push(key.to_string());
    }

    /// Bytes written to `key` on the output side.
    #[must_use]
    pub fn uploaded(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.uploads).get(key).cloned()
    }

    /// Output keys written so far.
    #[must_use]
    pub fn uploaded_keys(&self) -> Vec<String> {
        lock(&self.uploads).keys().cloned().collect()
    }

    /// Downloaded files still present in the scratch directory.
    #[must_use]
    pub fn local_files(&self) -> usize {
        std::fs::read_dir(self.scratch.path()).map_or(0, Iterator::count)
    }

    /// Downloads served so far.
    #[must_use]
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        Ok(lock(&self.objects)
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn download(&self, key: &str) -> BackendResult<PathBuf> {
        let data = lock(&self.objects)
            .get(key)
            .cloned()
            .ok_or_else(|| BackendError::new(BackendErrorKind::NotFound, "store.download", key))?;
        let serial = self.downloads.fetch_add(1, Ordering::SeqCst);
        let name = key.rsplit('/').next().unwrap_or(key);
        let path = self.scratch.path().join(format!("{serial}-{name}"));
        tokio::fs::write(&path, data)
            .await
            .map_err(|err| BackendError::transient("store.download", err.to_string()))?;
        Ok(path)
    }

    async fn upload(&self, data: Vec<u8>, key: &str, _content_type: &str) -> BackendResult<String> {
        lock(&self.uploads).insert(key.to_string(), data);
        Ok(format!("mem://output/{key}"))
    }

    async fn delete_local(&self, path: &Path) -> BackendResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(BackendError::transient("store.delete_local", err.to_string())),
        }
    }

    async fn get_metadata(&self, key: &str) -> BackendResult<ObjectMetadata> {
        if lock(&self.missing_metadata).iter().any(|hidden| hidden == key) {
            return Err(BackendError::new(
                BackendErrorKind::NotFound,
                "store.get_metadata",
                key,
            ));
        }
        let size = lock(&self.objects).get(key).map(Vec::len).ok_or_else(|| {
            BackendError::new(BackendErrorKind::NotFound, "store.get_metadata", key)
        })?;
        let mut metadata = sample_metadata(key);
        metadata.size_bytes = u64::try_from(size).unwrap_or(u64::MAX);
        metadata.updated = Some(Utc::now());
        Ok(metadata)
    }

    fn uri_for(&self, key: &str) -> String {
        format!("mem://{key}")
    }
}

struct ScriptedFailure {
    needle: String,
    kind: BackendErrorKind,
    remaining: usize,
}

/// Recognizer returning the sample transcript, with scripted failures.
#[derive(Default)]
pub struct ScriptedRecognizer {
    failures: Mutex<Vec<ScriptedFailure>>,
    calls: AtomicUsize,
    latency: Option<Duration>,
    probe: Option<InFlightProbe>,
    reject_health: AtomicBool,
}

impl ScriptedRecognizer {
    /// Recognizer that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `latency` inside every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Count concurrent calls with `probe`.
    #[must_use]
    pub fn with_probe(mut self, probe: InFlightProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Fail the next `times` calls whose URI contains `needle`.
    pub fn fail_times(&self, needle: &str, kind: BackendErrorKind, times: usize) {
        lock(&self.failures).push(ScriptedFailure {
            needle: needle.to_string(),
            kind,
            remaining: times,
        });
    }

    /// Fail every call whose URI contains `needle`.
    pub fn fail_always(&self, needle: &str, kind: BackendErrorKind) {
        self.fail_times(needle, kind, usize::MAX);
    }

    /// Make `health_check` report the recognizer as misconfigured.
    pub fn reject_health_check(&self) {
        self.reject_health.store(true, Ordering::SeqCst);
    }

    /// Calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, audio_uri: &str) -> Option<BackendErrorKind> {
        let mut failures = lock(&self.failures);
        let failure = failures
            .iter_mut()
            .find(|failure| failure.remaining > 0 && audio_uri.contains(&failure.needle))?;
        failure.remaining = failure.remaining.saturating_sub(1);
        Some(failure.kind)
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn transcribe(
        &self,
        audio_uri: &str,
        _config: &RecognitionConfig,
    ) -> BackendResult<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _entered = self.probe.as_ref().map(InFlightProbe::enter);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(kind) = self.scripted_failure(audio_uri) {
            return Err(BackendError::new(
                kind,
                "recognizer.transcribe",
                format!("scripted failure for {audio_uri}"),
            ));
        }
        Ok(sample_transcript(audio_uri))
    }

    async fn health_check(&self, _config: &RecognitionConfig) -> BackendResult<()> {
        if self.reject_health.load(Ordering::SeqCst) {
            Err(BackendError::new(
                BackendErrorKind::RecognizerConfig,
                "recognizer.health_check",
                "recognizer not found",
            ))
        } else {
            Ok(())
        }
    }
}

/// Redaction fake that treats every digit run as a phone number.
#[derive(Default)]
pub struct EchoRedactor {
    calls: AtomicUsize,
}

impl EchoRedactor {
    /// New redactor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect and de-identify calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RedactionService for EchoRedactor {
    async fn inspect(&self, text: &str) -> BackendResult<Vec<Finding>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut findings = Vec::new();
        let mut start: Option<usize> = None;
        for (idx, ch) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
            match (ch.is_ascii_digit(), start) {
                (true, None) => start = Some(idx),
                (false, Some(begin)) => {
                    findings.push(Finding {
                        info_type: "PHONE_NUMBER".into(),
                        likelihood: "LIKELY".into(),
                        quote: Some(text[begin..idx].to_string()),
                        byte_start: u64::try_from(begin).ok(),
                        byte_end: u64::try_from(idx).ok(),
                    });
                    start = None;
                }
                _ => {}
            }
        }
        Ok(findings)
    }

    async fn deidentify(&self, text: &str) -> BackendResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text
            .chars()
            .map(|ch| if ch.is_ascii_digit() { '#' } else { ch })
            .collect())
    }

    async fn health_check(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// Ingestion backend driven by queued responses.
///
/// With an empty queue, submissions succeed with [`Self::OPERATION_NAME`] and
/// polls report the operation as still running.
#[derive(Default)]
pub struct ScriptedBackend {
    submits: Mutex<VecDeque<BackendResult<OperationHandle>>>,
    polls: Mutex<VecDeque<BackendResult<OperationStatus>>>,
    requests: Mutex<Vec<IngestRequest>>,
    created: Mutex<Vec<ConversationRecord>>,
    create_failures: Mutex<Vec<String>>,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    unhealthy: AtomicBool,
}

impl ScriptedBackend {
    /// Operation name returned by unscripted submissions.
    pub const OPERATION_NAME: &'static str = "operations/test-ingest";

    /// Backend with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next submission.
    pub fn push_submit(&self, result: BackendResult<OperationHandle>) {
        lock(&self.submits).push_back(result);
    }

    /// Queue the result of the next poll.
    pub fn push_poll(&self, result: BackendResult<OperationStatus>) {
        lock(&self.polls).push_back(result);
    }

    /// Reject `create_single` for records whose id contains `needle`.
    pub fn fail_create(&self, needle: &str) {
        lock(&self.create_failures).push(needle.to_string());
    }

    /// Make `health_check` fail with a permission error.
    pub fn set_unhealthy(&self) {
        self.unhealthy.store(true, Ordering::SeqCst);
    }

    /// Submissions attempted.
    #[must_use]
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Polls attempted.
    #[must_use]
    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    /// Requests received by `submit_bulk`.
    #[must_use]
    pub fn requests(&self) -> Vec<IngestRequest> {
        lock(&self.requests).clone()
    }

    /// Records accepted by `create_single`.
    #[must_use]
    pub fn created(&self) -> Vec<ConversationRecord> {
        lock(&self.created).clone()
    }
}

#[async_trait]
impl IngestionBackend for ScriptedBackend {
    async fn submit_bulk(&self, request: &IngestRequest) -> BackendResult<OperationHandle> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        let scripted = lock(&self.submits).pop_front();
        scripted.unwrap_or_else(|| {
            Ok(OperationHandle {
                name: Self::OPERATION_NAME.to_string(),
                started_at: Utc::now(),
            })
        })
    }

    async fn poll(&self, _handle: &OperationHandle) -> BackendResult<OperationStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = lock(&self.polls).pop_front();
        scripted.unwrap_or_else(|| Ok(OperationStatus::default()))
    }

    async fn create_single(&self, record: &ConversationRecord) -> BackendResult<String> {
        let rejected = lock(&self.create_failures)
            .iter()
            .any(|needle| record.conversation_id.contains(needle.as_str()));
        if rejected {
            return Err(BackendError::new(
                BackendErrorKind::InvalidRequest,
                "ingest.create_single",
                format!("scripted rejection of {}", record.conversation_id),
            ));
        }
        lock(&self.created).push(record.clone());
        Ok(format!("conversations/{}", record.conversation_id))
    }

    async fn health_check(&self) -> BackendResult<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(BackendError::new(
                BackendErrorKind::PermissionDenied,
                "ingest.health_check",
                "scripted permission failure",
            ))
        } else {
            Ok(())
        }
    }
}
