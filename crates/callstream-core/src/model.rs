//! DTOs exchanged between the orchestration core and its collaborators.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to one input audio object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkItem {
    /// Object store key.
    pub key: String,
}

impl WorkItem {
    /// Wrap an object store key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Final path component of the key.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    /// File name without its extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }
}

/// Metadata describing a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Object store key.
    pub key: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// MIME type inferred by the store.
    pub content_type: String,
    /// Creation time when the store tracks it.
    pub created: Option<DateTime<Utc>>,
    /// Last modification time.
    pub updated: Option<DateTime<Utc>>,
    /// Content checksum (hex SHA-256), when the store or pipeline computed one.
    pub checksum: Option<String>,
}

/// Options passed to the speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// BCP-47 language code.
    pub language_code: String,
    /// Recognition model name.
    pub model: String,
    /// Whether to request speaker diarization.
    pub enable_diarization: bool,
    /// Lower bound on diarized speakers.
    pub min_speakers: u32,
    /// Upper bound on diarized speakers.
    pub max_speakers: u32,
    /// Channel count of the source audio.
    pub audio_channel_count: u32,
}

/// One recognized utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Audio channel the utterance came from.
    pub channel: u32,
    /// Diarized speaker tag, zero when diarization is off.
    pub speaker_tag: u32,
    /// Recognized text.
    pub text: String,
    /// Offset of the first word.
    pub start_secs: f64,
    /// Offset of the last word.
    pub end_secs: f64,
    /// Recognizer confidence in `[0, 1]`.
    pub confidence: f64,
    /// Number of words in the utterance.
    pub word_count: usize,
}

/// Recognizer output for one audio object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// URI of the audio that was transcribed.
    pub source_uri: String,
    /// Utterances in recognizer order.
    pub utterances: Vec<Utterance>,
}

impl Transcript {
    /// Latest utterance end offset.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.utterances
            .iter()
            .map(|u| u.end_secs)
            .fold(0.0, f64::max)
    }

    /// Mean utterance confidence, zero for an empty transcript.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_confidence(&self) -> f64 {
        if self.utterances.is_empty() {
            return 0.0;
        }
        let total: f64 = self.utterances.iter().map(|u| u.confidence).sum();
        total / self.utterances.len() as f64
    }

    /// Total recognized words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.utterances.iter().map(|u| u.word_count).sum()
    }
}

/// A sensitive span reported by the redaction service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Info type name, e.g. `PHONE_NUMBER`.
    pub info_type: String,
    /// Likelihood label.
    pub likelihood: String,
    /// Matched text when quotes were requested.
    pub quote: Option<String>,
    /// Byte offset where the match starts.
    pub byte_start: Option<u64>,
    /// Byte offset where the match ends.
    pub byte_end: Option<u64>,
}

/// Aggregate of one redaction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionSummary {
    /// Text fields submitted.
    pub fields_processed: usize,
    /// Fields whose text changed.
    pub fields_redacted: usize,
    /// Distinct info types found.
    pub info_types: BTreeSet<String>,
}

/// Transcript with sensitive spans removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedTranscript {
    /// Transcript whose utterance text has been de-identified.
    pub transcript: Transcript,
    /// Findings collected during inspection.
    pub findings: Vec<Finding>,
    /// Aggregate counts.
    pub summary: RedactionSummary,
}

/// Participant role attached to a record segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantRole {
    /// The contact-centre agent.
    Agent,
    /// The calling customer.
    Customer,
}

/// One segment of a formatted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSegment {
    /// Redacted text.
    pub text: String,
    /// Recognizer confidence.
    pub confidence: f64,
    /// Segment start offset.
    pub start_secs: f64,
    /// Segment end offset.
    pub end_secs: f64,
    /// Who spoke.
    pub role: ParticipantRole,
    /// Source audio channel.
    pub channel: u32,
}

/// Call-level metadata attached to a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Channel carrying the customer.
    pub customer_channel: u32,
    /// Channel carrying the agent.
    pub agent_channel: u32,
    /// Agent identifier.
    pub agent_id: String,
    /// Customer identifier.
    pub customer_id: String,
    /// Call duration derived from the transcript.
    pub call_duration_secs: f64,
}

/// Transcript quality figures carried on the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean recognizer confidence.
    pub average_confidence: f64,
    /// Latest utterance end offset.
    pub total_duration_secs: f64,
    /// Total recognized words.
    pub word_count: usize,
}

/// Structured conversation record uploaded to the analytics backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Client-assigned conversation identifier.
    pub conversation_id: String,
    /// URI of the source audio.
    pub source_uri: String,
    /// BCP-47 language code.
    pub language_code: String,
    /// Time after which the backend may delete the record.
    pub expire_time: DateTime<Utc>,
    /// Call-level metadata.
    pub call_metadata: CallMetadata,
    /// Segments ordered by start offset.
    pub segments: Vec<RecordSegment>,
    /// Free-form labels.
    pub labels: BTreeMap<String, String>,
    /// Transcript quality figures.
    pub quality: QualityMetrics,
    /// Redaction applied to the segments.
    pub redaction: RedactionSummary,
    /// Size of the source audio.
    pub source_size_bytes: u64,
    /// Checksum of the source audio when known.
    pub source_checksum: Option<String>,
}

/// Bulk ingestion request handed to the backend in direct mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    /// Audio object URIs to ingest.
    pub object_uris: Vec<String>,
    /// Fully-qualified recognizer resource path.
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
    /// Days before ingested conversations expire.
    pub ttl_days: u32,
}

/// Handle to an in-flight remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Backend operation name.
    pub name: String,
    /// Time the submission was accepted.
    pub started_at: DateTime<Utc>,
}

/// Remote status of an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    /// Whether the operation reached a terminal state.
    pub done: bool,
    /// Raw metadata payload; shape varies across backend versions.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Terminal error text reported by the backend.
    #[serde(default)]
    pub error: Option<String>,
}
