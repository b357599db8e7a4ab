#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]

//! Orchestration core for callstream runs.
//!
//! Layout: `retry.rs` (exponential backoff wrapper), `scheduler.rs` (bounded
//! task scheduler), `batch.rs` (chunked scheduling), `outcome.rs` (ingestion
//! outcome classification), `lro.rs` (bulk ingestion monitor), `error.rs`.

pub mod batch;
pub mod error;
pub mod lro;
pub mod outcome;
pub mod retry;
pub mod scheduler;

pub use batch::BatchSplitter;
pub use error::{RuntimeError, RuntimeResult};
pub use lro::{LroMonitor, LroSettings, LroState};
pub use outcome::{
    DuplicateParse, IngestCounters, IngestOutcome, MetadataSource, classify_counters,
    decode_counters, parse_duplicate_message, partial_errors,
};
pub use retry::{Retrier, RetryPolicy, Retryable, with_timeout};
pub use scheduler::{BatchReport, TaskFailure, TaskResult, TaskScheduler};
