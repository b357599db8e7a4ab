#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]

//! Vendor-agnostic collaborator interfaces and DTOs for the callstream pipeline.
//!
//! Layout: `model.rs` (work items, transcripts, records, operation handles),
//! `service.rs` (collaborator traits), `error.rs` (classified backend errors).

pub mod error;
pub mod model;
pub mod service;

pub use error::{BackendError, BackendErrorKind, BackendResult};
pub use model::{
    CallMetadata, ConversationRecord, Finding, IngestRequest, ObjectMetadata, OperationHandle,
    OperationStatus, ParticipantRole, QualityMetrics, RecognitionConfig, RecordSegment,
    RedactedTranscript, RedactionSummary, Transcript, Utterance, WorkItem,
};
pub use service::{
    ConversationFormatter, IngestionBackend, ObjectStore, RedactionService, SpeechRecognizer,
};
