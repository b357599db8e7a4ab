//! Collaborator traits implemented by store and service adapters.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{BackendError, BackendResult};
use crate::model::{
    ConversationRecord, Finding, IngestRequest, ObjectMetadata, OperationHandle, OperationStatus,
    RecognitionConfig, RedactedTranscript, Transcript, WorkItem,
};

/// Object store holding input audio and processed records.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List input keys under `prefix`.
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Copy an input object to a local temporary file.
    async fn download(&self, key: &str) -> BackendResult<PathBuf>;

    /// Write `data` to the output side of the store, returning its URI.
    async fn upload(&self, data: Vec<u8>, key: &str, content_type: &str) -> BackendResult<String>;

    /// Remove a local file previously returned by [`ObjectStore::download`].
    async fn delete_local(&self, path: &Path) -> BackendResult<()>;

    /// Describe an input object.
    async fn get_metadata(&self, key: &str) -> BackendResult<ObjectMetadata>;

    /// URI external services use to address an input object.
    fn uri_for(&self, key: &str) -> String;

    /// Confirm the store is reachable by listing the root.
    async fn health_check(&self) -> BackendResult<()> {
        self.list("").await.map(|_| ())
    }
}

/// Speech-to-text service.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Transcribe the audio at `audio_uri`. May be long-running; callers
    /// impose the timeout.
    async fn transcribe(
        &self,
        audio_uri: &str,
        config: &RecognitionConfig,
    ) -> BackendResult<Transcript>;

    /// Confirm the recognizer accepts the configuration; default reports lack of support.
    async fn health_check(&self, config: &RecognitionConfig) -> BackendResult<()> {
        let _ = config;
        Err(BackendError::unsupported("recognizer.health_check"))
    }
}

/// PII inspection and de-identification service.
#[async_trait]
pub trait RedactionService: Send + Sync {
    /// Report sensitive spans in `text`.
    async fn inspect(&self, text: &str) -> BackendResult<Vec<Finding>>;

    /// Return `text` with sensitive spans masked.
    async fn deidentify(&self, text: &str) -> BackendResult<String>;

    /// Confirm the configured templates exist; default reports lack of support.
    async fn health_check(&self) -> BackendResult<()> {
        Err(BackendError::unsupported("redaction.health_check"))
    }
}

/// Pure transformation from a redacted transcript into a backend record.
pub trait ConversationFormatter: Send + Sync {
    /// Build the conversation record for `item` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns an error when the transcript cannot be represented as a record.
    fn format(
        &self,
        item: &WorkItem,
        redacted: &RedactedTranscript,
        metadata: &ObjectMetadata,
        now: DateTime<Utc>,
    ) -> BackendResult<ConversationRecord>;
}

/// Analytics backend accepting single records and bulk ingestion jobs.
#[async_trait]
pub trait IngestionBackend: Send + Sync {
    /// Start a bulk ingestion operation.
    async fn submit_bulk(&self, request: &IngestRequest) -> BackendResult<OperationHandle>;

    /// Fetch the current status of an operation.
    async fn poll(&self, handle: &OperationHandle) -> BackendResult<OperationStatus>;

    /// Create one conversation, returning the backend's name for it.
    async fn create_single(&self, record: &ConversationRecord) -> BackendResult<String>;

    /// Confirm the backend is reachable; default reports lack of support.
    async fn health_check(&self) -> BackendResult<()> {
        Err(BackendError::unsupported("ingest.health_check"))
    }
}
