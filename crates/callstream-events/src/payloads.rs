//! Event payloads emitted during a pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier assigned to each event emitted by the pipeline.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed events surfaced while a run progresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run began with the given number of discovered files.
    RunStarted {
        /// Processing mode label.
        mode: String,
        /// Number of files in the worklist.
        files: usize,
    },
    /// A file entered the per-file pipeline.
    FileStarted {
        /// Store key of the file.
        file: String,
    },
    /// A pipeline stage finished for a file.
    StageCompleted {
        /// Store key of the file.
        file: String,
        /// Stage name.
        stage: String,
    },
    /// A file finished every stage.
    FileCompleted {
        /// Store key of the file.
        file: String,
        /// Conversation identifier assigned by the backend.
        conversation_id: String,
    },
    /// A file left the pipeline early.
    FileFailed {
        /// Store key of the file.
        file: String,
        /// Stage that failed.
        stage: String,
        /// Failure description.
        message: String,
    },
    /// A bulk ingestion operation was accepted by the backend.
    IngestSubmitted {
        /// Backend operation name.
        operation: String,
    },
    /// A bulk ingestion operation reached a terminal state.
    IngestCompleted {
        /// Classified outcome kind.
        kind: String,
        /// Conversations ingested.
        ingested: u64,
        /// Files skipped as duplicates.
        duplicates: u64,
        /// Files the backend rejected.
        failed: u64,
    },
    /// A run finished.
    RunCompleted {
        /// Files processed successfully.
        files_processed: u64,
        /// Files that failed.
        files_failed: u64,
    },
}

impl Event {
    /// Machine-friendly discriminator used for metrics and log filtering.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::FileStarted { .. } => "file_started",
            Self::StageCompleted { .. } => "stage_completed",
            Self::FileCompleted { .. } => "file_completed",
            Self::FileFailed { .. } => "file_failed",
            Self::IngestSubmitted { .. } => "ingest_submitted",
            Self::IngestCompleted { .. } => "ingest_completed",
            Self::RunCompleted { .. } => "run_completed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}
