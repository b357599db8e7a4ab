//! Typed configuration model.
//!
//! # Design
//! - Each section maps onto one collaborator or concern.
//! - Durations are exposed through accessor methods so callers never deal
//!   with raw integer units.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Project identifier used to build backend resource paths.
    #[serde(default)]
    pub project_id: String,
    /// Object store layout.
    pub store: StoreSettings,
    /// Speech recognizer settings.
    pub recognizer: RecognizerSettings,
    /// PII redaction settings.
    pub redaction: RedactionSettings,
    /// Analytics backend settings.
    pub ingest: IngestSettings,
    /// Scheduling, retry, and run-shape settings.
    #[serde(default)]
    pub processing: ProcessingSettings,
    /// Logging output settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Object store layout and discovery filters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSettings {
    /// Root directory holding input audio.
    pub input_root: PathBuf,
    /// Root directory receiving processed records.
    pub output_root: PathBuf,
    /// Key prefix applied when listing input audio.
    #[serde(default)]
    pub input_prefix: String,
    /// File name prefix required for discovery; empty disables the filter.
    #[serde(default = "defaults::file_prefix_filter")]
    pub file_prefix_filter: String,
    /// Accepted audio extensions, including the leading dot.
    #[serde(default = "defaults::audio_extensions")]
    pub audio_extensions: Vec<String>,
    /// Key prefix for persisted conversation records and run summaries.
    #[serde(default = "defaults::output_prefix")]
    pub output_prefix: String,
    /// Directory used for temporary downloads.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl StoreSettings {
    /// Returns `true` when `key` passes the prefix and extension filters.
    #[must_use]
    pub fn accepts(&self, key: &str) -> bool {
        let name = key.rsplit('/').next().unwrap_or(key);
        if !self.file_prefix_filter.is_empty() && !name.starts_with(&self.file_prefix_filter) {
            return false;
        }
        let lowered = name.to_ascii_lowercase();
        self.audio_extensions
            .iter()
            .any(|ext| lowered.ends_with(&ext.to_ascii_lowercase()))
    }
}

/// Speech recognizer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecognizerSettings {
    /// Base URL of the recognizer service.
    pub endpoint: String,
    /// BCP-47 language code.
    #[serde(default = "defaults::language_code")]
    pub language_code: String,
    /// Recognition model name.
    #[serde(default = "defaults::recognizer_model")]
    pub model: String,
    /// Whether to request speaker diarization.
    #[serde(default = "defaults::enabled")]
    pub enable_diarization: bool,
    /// Lower bound on diarized speakers.
    #[serde(default = "defaults::speaker_count")]
    pub min_speakers: u32,
    /// Upper bound on diarized speakers.
    #[serde(default = "defaults::speaker_count")]
    pub max_speakers: u32,
    /// Number of audio channels in the source recordings.
    #[serde(default = "defaults::audio_channels")]
    pub audio_channel_count: u32,
    /// Recognizer resource id used for direct ingestion.
    #[serde(default = "defaults::recognizer_id")]
    pub recognizer_id: String,
    /// Recognizer resource location.
    #[serde(default = "defaults::recognizer_location")]
    pub location: String,
}

/// PII redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedactionSettings {
    /// Base URL of the redaction service.
    pub endpoint: String,
    /// Inspect template name; inspection is skipped when absent.
    #[serde(default)]
    pub inspect_template: Option<String>,
    /// De-identify template name; text passes through when absent.
    #[serde(default)]
    pub deidentify_template: Option<String>,
    /// Whether findings include the matched quote.
    #[serde(default = "defaults::enabled")]
    pub include_quote: bool,
}

/// Analytics backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSettings {
    /// Base URL of the analytics backend.
    pub endpoint: String,
    /// Backend location.
    #[serde(default = "defaults::ingest_location")]
    pub location: String,
    /// Days before an ingested conversation expires.
    #[serde(default = "defaults::ttl_days")]
    pub ttl_days: u32,
    /// Agent identifier attached to conversations.
    #[serde(default = "defaults::agent_id")]
    pub agent_id: String,
    /// Customer identifier attached to conversations.
    #[serde(default = "defaults::customer_id")]
    pub customer_id: String,
    /// Audio channel carrying the agent.
    #[serde(default = "defaults::agent_channel")]
    pub agent_channel: u32,
    /// Audio channel carrying the customer.
    #[serde(default = "defaults::customer_channel")]
    pub customer_channel: u32,
    /// Hard wall-clock limit on a bulk ingestion operation.
    #[serde(default = "defaults::lro_timeout_secs")]
    pub lro_timeout_secs: u64,
    /// Delay between operation polls.
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// First backoff after a quota rejection on submission.
    #[serde(default = "defaults::quota_initial_delay_secs")]
    pub quota_initial_delay_secs: u64,
    /// Ceiling for quota backoff.
    #[serde(default = "defaults::quota_max_delay_secs")]
    pub quota_max_delay_secs: u64,
    /// Submission attempts allowed while quota is exhausted.
    #[serde(default = "defaults::quota_max_attempts")]
    pub quota_max_attempts: u32,
}

impl IngestSettings {
    /// Hard timeout applied to bulk ingestion.
    #[must_use]
    pub const fn lro_timeout(&self) -> Duration {
        Duration::from_secs(self.lro_timeout_secs)
    }

    /// Delay between operation polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Initial quota backoff.
    #[must_use]
    pub const fn quota_initial_delay(&self) -> Duration {
        Duration::from_secs(self.quota_initial_delay_secs)
    }

    /// Quota backoff ceiling.
    #[must_use]
    pub const fn quota_max_delay(&self) -> Duration {
        Duration::from_secs(self.quota_max_delay_secs)
    }
}

/// Which pipeline drives the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    /// Transcribe, redact, format, and upload each file locally.
    #[default]
    Manual,
    /// Hand audio references to the backend for server-side ingestion.
    Direct,
}

impl ProcessingMode {
    /// Stable label used in logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Direct => "direct",
        }
    }
}

/// Scheduling, retry, and run-shape settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessingSettings {
    /// Per-chunk file concurrency.
    #[serde(default = "defaults::max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// Number of chunks processed at once.
    #[serde(default = "defaults::chunk_concurrency")]
    pub chunk_concurrency: usize,
    /// Attempts per remote call, including the first.
    #[serde(default = "defaults::retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "defaults::retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Ceiling for a single retry delay.
    #[serde(default = "defaults::retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Timeout applied to each remote call.
    #[serde(default = "defaults::call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Optional limit on the whole manual batch.
    #[serde(default)]
    pub batch_timeout_secs: Option<u64>,
    /// Which pipeline to run.
    #[serde(default)]
    pub mode: ProcessingMode,
    /// Upper bound on discovered files.
    #[serde(default)]
    pub file_limit: Option<usize>,
    /// Whether the run summary is written to the object store.
    #[serde(default = "defaults::enabled")]
    pub persist_summary: bool,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            max_concurrent_files: defaults::max_concurrent_files(),
            chunk_concurrency: defaults::chunk_concurrency(),
            retry_max_attempts: defaults::retry_max_attempts(),
            retry_base_delay_ms: defaults::retry_base_delay_ms(),
            retry_max_delay_ms: defaults::retry_max_delay_ms(),
            call_timeout_secs: defaults::call_timeout_secs(),
            batch_timeout_secs: None,
            mode: ProcessingMode::default(),
            file_limit: None,
            persist_summary: true,
        }
    }
}

impl ProcessingSettings {
    /// Delay before the first retry.
    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    /// Ceiling for a single retry delay.
    #[must_use]
    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Timeout applied to each remote call.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Optional timeout for the whole manual batch.
    #[must_use]
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "defaults::log_level")]
    pub level: String,
    /// `json` or `pretty`; inferred from the build when absent.
    #[serde(default)]
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            format: None,
        }
    }
}
