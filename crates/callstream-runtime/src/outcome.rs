//! Classification of bulk ingestion results.
//!
//! # Design
//! - Operation metadata is decoded by an ordered list of decoders: the
//!   structured stats block, then flat top-level counters, then a documented
//!   fallback that assumes one conversation was ingested.
//! - The backend reports "everything was already ingested" as an error. The
//!   error text is matched against the known phrasings in exactly one place,
//!   [`parse_duplicate_message`]; unrecognised duplicate wording is reported as
//!   [`DuplicateParse::Unparsed`] so callers can count it.

use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Counters extracted from a finished ingestion operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestCounters {
    /// Objects the backend looked at.
    pub processed: u64,
    /// Conversations created.
    pub ingested: u64,
    /// Objects skipped because they were already ingested.
    pub duplicates: u64,
    /// Objects the backend rejected.
    pub failed: u64,
}

impl IngestCounters {
    /// Counters assumed when no metadata shape could be decoded.
    #[must_use]
    pub const fn fallback() -> Self {
        Self {
            processed: 1,
            ingested: 1,
            duplicates: 0,
            failed: 0,
        }
    }
}

/// Terminal, classified result of one bulk ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// Conversations were created and nothing was skipped.
    Succeeded {
        /// Decoded counters.
        counters: IngestCounters,
        /// Per-object errors the backend attached to the operation.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        partial_errors: Vec<String>,
    },
    /// Some objects were skipped as duplicates, others were ingested or failed.
    PartialSuccess {
        /// Decoded counters.
        counters: IngestCounters,
        /// Per-object errors the backend attached to the operation.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        partial_errors: Vec<String>,
    },
    /// Every object had already been ingested.
    AllDuplicates {
        /// Decoded counters.
        counters: IngestCounters,
    },
    /// The operation failed.
    Failed {
        /// Failure description.
        reason: String,
        /// Counters known at the time of failure.
        counters: IngestCounters,
    },
    /// The operation did not finish before the monitor gave up.
    TimedOut {
        /// Backend operation name, empty if submission never completed.
        operation: String,
        /// Seconds spent waiting.
        waited_secs: u64,
    },
}

impl IngestOutcome {
    /// Failed outcome without counters.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            counters: IngestCounters::default(),
        }
    }

    /// Outcome for an error message that reported skipped duplicates.
    #[must_use]
    pub fn from_duplicates(duplicates: u64, failed: u64) -> Self {
        classify_counters(
            IngestCounters {
                processed: duplicates + failed,
                ingested: 0,
                duplicates,
                failed,
            },
            Vec::new(),
        )
    }

    /// Stable label for logs, metrics, and events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "succeeded",
            Self::PartialSuccess { .. } => "partial_success",
            Self::AllDuplicates { .. } => "all_duplicates",
            Self::Failed { .. } => "failed",
            Self::TimedOut { .. } => "timed_out",
        }
    }

    /// Full deduplication counts as success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::PartialSuccess { .. } | Self::AllDuplicates { .. }
        )
    }

    /// Counters carried by the outcome; zeroes for a timeout.
    #[must_use]
    pub const fn counters(&self) -> IngestCounters {
        match self {
            Self::Succeeded { counters, .. }
            | Self::PartialSuccess { counters, .. }
            | Self::AllDuplicates { counters }
            | Self::Failed { counters, .. } => *counters,
            Self::TimedOut { .. } => IngestCounters {
                processed: 0,
                ingested: 0,
                duplicates: 0,
                failed: 0,
            },
        }
    }

    /// Conversations created.
    #[must_use]
    pub const fn ingested(&self) -> u64 {
        self.counters().ingested
    }

    /// Objects skipped as duplicates.
    #[must_use]
    pub const fn duplicates(&self) -> u64 {
        self.counters().duplicates
    }

    /// Objects the backend rejected.
    #[must_use]
    pub const fn failed(&self) -> u64 {
        self.counters().failed
    }
}

/// Map decoded counters onto an outcome.
#[must_use]
pub fn classify_counters(counters: IngestCounters, partial_errors: Vec<String>) -> IngestOutcome {
    if counters.duplicates > 0 {
        if counters.ingested == 0 && counters.failed == 0 {
            IngestOutcome::AllDuplicates { counters }
        } else {
            IngestOutcome::PartialSuccess {
                counters,
                partial_errors,
            }
        }
    } else if counters.failed > 0 && counters.ingested == 0 {
        IngestOutcome::Failed {
            reason: "backend rejected every file".to_string(),
            counters,
        }
    } else {
        IngestOutcome::Succeeded {
            counters,
            partial_errors,
        }
    }
}

/// Which decoder produced a set of counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    /// The nested `ingestConversationsStats` block.
    Structured,
    /// Counters at the top level of the metadata.
    Flat,
    /// Nothing decoded; one ingested conversation assumed.
    Fallback,
}

impl MetadataSource {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Flat => "flat",
            Self::Fallback => "fallback",
        }
    }
}

type Decoder = fn(&Value) -> Option<IngestCounters>;

const DECODERS: [(MetadataSource, Decoder); 2] = [
    (MetadataSource::Structured, decode_structured),
    (MetadataSource::Flat, decode_flat),
];

/// Decode counters from operation metadata, trying each known shape in turn.
#[must_use]
pub fn decode_counters(metadata: &Value) -> (IngestCounters, MetadataSource) {
    DECODERS
        .iter()
        .find_map(|(source, decode)| decode(metadata).map(|counters| (counters, *source)))
        .unwrap_or((IngestCounters::fallback(), MetadataSource::Fallback))
}

/// Per-object error messages attached to operation metadata.
#[must_use]
pub fn partial_errors(metadata: &Value) -> Vec<String> {
    field(metadata, "partial_errors", "partialErrors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|entry| match entry {
                    Value::String(text) => text.clone(),
                    other => other
                        .get("message")
                        .and_then(Value::as_str)
                        .map_or_else(|| other.to_string(), str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_structured(metadata: &Value) -> Option<IngestCounters> {
    field(
        metadata,
        "ingest_conversations_stats",
        "ingestConversationsStats",
    )
    .and_then(decode_flat)
}

fn decode_flat(stats: &Value) -> Option<IngestCounters> {
    let processed = count(stats, "processed_object_count", "processedObjectCount");
    let ingested = count(stats, "successful_ingest_count", "successfulIngestCount");
    let failed = count(stats, "failed_ingest_count", "failedIngestCount");
    let duplicates = count(stats, "duplicates_skipped_count", "duplicatesSkippedCount");
    if processed.is_none() && ingested.is_none() && failed.is_none() && duplicates.is_none() {
        return None;
    }
    Some(IngestCounters {
        processed: processed.unwrap_or_default(),
        ingested: ingested.unwrap_or_default(),
        duplicates: duplicates.unwrap_or_default(),
        failed: failed.unwrap_or_default(),
    })
}

fn field<'a>(value: &'a Value, snake: &str, camel: &str) -> Option<&'a Value> {
    value.get(snake).or_else(|| value.get(camel))
}

// Proto-JSON encodes int64 as strings.
fn count(value: &Value, snake: &str, camel: &str) -> Option<u64> {
    match field(value, snake, camel)? {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

/// Result of matching an error message against known duplicate phrasings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateParse {
    /// The message reported skipped duplicates.
    Matched {
        /// Objects skipped as already ingested.
        duplicates: u64,
        /// Objects that failed outright.
        failed: u64,
    },
    /// The message mentions existing objects but in unknown wording.
    Unparsed,
    /// The message is unrelated to deduplication.
    NotDuplicate,
}

const SKIPPED: &str = r"(?i)(\d[\d,]*)\s+were\s+skipped\s+as\s+they\s+already\s+exist";
const FAILED: &str = r"(?i)(\d[\d,]*)\s+failed\b";
const FAILED_WORD: &str = r"(?i)\bfailed\b";

static SKIPPED_RE: OnceCell<Regex> = OnceCell::new();
static FAILED_RE: OnceCell<Regex> = OnceCell::new();
static FAILED_WORD_RE: OnceCell<Regex> = OnceCell::new();

fn pattern(cell: &'static OnceCell<Regex>, source: &str) -> Option<&'static Regex> {
    cell.get_or_try_init(|| Regex::new(source)).ok()
}

fn captured_count(re: &Regex, message: &str) -> Option<u64> {
    let digits: String = re
        .captures(message)?
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Recognise the backend's "already exist" error phrasings.
///
/// The skipped and failed clauses are matched independently, so either may
/// come first. Counts may carry thousands separators.
///
/// Known formats:
/// - `"<M> failed and <N> were skipped as they already exist"`
/// - `"<N> were skipped as they already exist, <M> failed"`
/// - `"<N> were skipped as they already exist"` (no failures)
///
/// A message that mentions failures without a readable count is
/// [`DuplicateParse::Unparsed`].
#[must_use]
pub fn parse_duplicate_message(message: &str) -> DuplicateParse {
    let skipped = pattern(&SKIPPED_RE, SKIPPED).and_then(|re| captured_count(re, message));
    let Some(duplicates) = skipped else {
        return if message.to_ascii_lowercase().contains("already exist") {
            DuplicateParse::Unparsed
        } else {
            DuplicateParse::NotDuplicate
        };
    };

    if let Some(failed) = pattern(&FAILED_RE, FAILED).and_then(|re| captured_count(re, message)) {
        return DuplicateParse::Matched { duplicates, failed };
    }
    match pattern(&FAILED_WORD_RE, FAILED_WORD) {
        Some(re) if !re.is_match(message) => DuplicateParse::Matched {
            duplicates,
            failed: 0,
        },
        _ => DuplicateParse::Unparsed,
    }
}
