//! Run statistics and the end-of-run report.
//!
//! # Design
//! - [`RunStatistics`] is owned by the driver and only mutated between
//!   batches, never from inside a scheduled task.
//! - [`summarize`] is pure: the same inputs always serialise to the same bytes.

use callstream_config::ProcessingMode;
use callstream_core::ObjectStore;
use callstream_runtime::IngestOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::pipeline::{PipelineFileResult, StageKind, output_key};

/// Counters accumulated over one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatistics {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// Pipeline that drove the run.
    pub mode: ProcessingMode,
    /// Files selected by discovery.
    pub files_discovered: u64,
    /// Files that finished successfully.
    pub files_processed: u64,
    /// Files that failed.
    pub files_failed: u64,
    /// Conversations present in the backend after the run.
    pub conversations_uploaded: u64,
    /// Files whose upload stage failed.
    pub upload_failures: u64,
    /// Time the run started.
    pub start_time: Option<DateTime<Utc>>,
    /// Time the run ended.
    pub end_time: Option<DateTime<Utc>>,
}

impl RunStatistics {
    /// Empty statistics for a new run.
    #[must_use]
    pub fn new(mode: ProcessingMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            files_discovered: 0,
            files_processed: 0,
            files_failed: 0,
            conversations_uploaded: 0,
            upload_failures: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// Mark the start of the run.
    pub const fn start(&mut self, at: DateTime<Utc>) {
        self.start_time = Some(at);
    }

    /// Mark the end of the run.
    pub const fn finish(&mut self, at: DateTime<Utc>) {
        self.end_time = Some(at);
    }

    /// Record the size of the worklist.
    pub fn record_discovered(&mut self, files: usize) {
        self.files_discovered = to_u64(files);
    }

    /// Fold one file result into the counters.
    pub fn record_file(&mut self, result: &PipelineFileResult) {
        if result.success {
            self.files_processed += 1;
        } else {
            self.files_failed += 1;
            if result.failed_stage == Some(StageKind::Upload) {
                self.upload_failures += 1;
            }
        }
        if result.conversation_id.is_some() {
            self.conversations_uploaded += 1;
        }
    }

    /// Fold a bulk ingestion outcome covering `files` files into the counters.
    ///
    /// Rejected files are failures; the rest count as processed. Failed and
    /// timed-out operations fail every file.
    pub fn record_ingest(&mut self, outcome: &IngestOutcome, files: usize) {
        let files = to_u64(files);
        let failed = match outcome {
            IngestOutcome::Failed { .. } | IngestOutcome::TimedOut { .. } => files,
            _ => outcome.failed().min(files),
        };
        self.files_failed += failed;
        self.files_processed += files - failed;
        self.conversations_uploaded += outcome.ingested() + outcome.duplicates();
    }

    /// Elapsed wall-clock time, when both ends are known.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                let elapsed = end.signed_duration_since(start);
                #[allow(clippy::cast_precision_loss)]
                let millis = elapsed.num_milliseconds() as f64;
                Some(millis / 1_000.0)
            }
            _ => None,
        }
    }
}

fn to_u64(value: usize) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

/// A file that completed every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessfulFile {
    /// Store key of the input audio.
    pub source: String,
    /// Backend name of the created conversation.
    pub conversation_id: Option<String>,
}

/// A file that left the pipeline early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    /// Store key of the input audio.
    pub source: String,
    /// Failure description.
    pub error: Option<String>,
    /// Stage that failed, when the file reached one.
    pub failed_stage: Option<StageKind>,
    /// Stages that completed before the failure.
    pub steps_completed: Vec<StageKind>,
}

/// Final report of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// Pipeline that drove the run.
    pub mode: ProcessingMode,
    /// Files selected by discovery.
    pub files_discovered: u64,
    /// Files that finished successfully.
    pub files_processed: u64,
    /// Files that failed.
    pub files_failed: u64,
    /// Conversations present in the backend after the run.
    pub conversations_uploaded: u64,
    /// Files whose upload stage failed.
    pub upload_failures: u64,
    /// Percentage of finished files that succeeded.
    pub success_rate: f64,
    /// Percentage of successful files that produced a conversation.
    pub upload_success_rate: f64,
    /// Time the run started.
    pub start_time: Option<DateTime<Utc>>,
    /// Time the run ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Elapsed seconds, when both ends are known.
    pub duration_seconds: Option<f64>,
    /// Files that completed.
    pub successful_files: Vec<SuccessfulFile>,
    /// Files that failed.
    pub failed_files: Vec<FailedFile>,
    /// Classified bulk ingestion outcome in direct mode.
    pub ingest: Option<IngestOutcome>,
}

impl RunReport {
    /// Process exit code: zero only when no file failed.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        if self.files_failed == 0 { 0 } else { 1 }
    }

    /// Pretty JSON rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_json(&self) -> AppResult<String> {
        serde_json::to_string_pretty(self).map_err(|err| AppError::serialize("report.to_json", err))
    }
}

/// Percentage of `part` in `total`, rounded to two decimals; zero when `total` is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let ratio = part as f64 / total as f64 * 100.0;
    (ratio * 100.0).round() / 100.0
}

/// Aggregate per-file results, or a bulk ingestion outcome, into a report.
///
/// With file results the counts come from the results themselves; in direct
/// mode they come from `stats`.
#[must_use]
pub fn summarize(
    stats: &RunStatistics,
    results: &[PipelineFileResult],
    ingest: Option<&IngestOutcome>,
) -> RunReport {
    let (files_processed, files_failed, conversations_uploaded, upload_failures) =
        if ingest.is_some() {
            (
                stats.files_processed,
                stats.files_failed,
                stats.conversations_uploaded,
                stats.upload_failures,
            )
        } else {
            let mut tally = RunStatistics::new(stats.mode);
            for result in results {
                tally.record_file(result);
            }
            (
                tally.files_processed,
                tally.files_failed,
                tally.conversations_uploaded,
                tally.upload_failures,
            )
        };

    let successful_files = results
        .iter()
        .filter(|result| result.success)
        .map(|result| SuccessfulFile {
            source: result.source.clone(),
            conversation_id: result.conversation_id.clone(),
        })
        .collect();
    let failed_files = results
        .iter()
        .filter(|result| !result.success)
        .map(|result| FailedFile {
            source: result.source.clone(),
            error: result.error.clone(),
            failed_stage: result.failed_stage,
            steps_completed: result.steps_completed.clone(),
        })
        .collect();

    RunReport {
        run_id: stats.run_id,
        mode: stats.mode,
        files_discovered: stats.files_discovered,
        files_processed,
        files_failed,
        conversations_uploaded,
        upload_failures,
        success_rate: percentage(files_processed, files_processed + files_failed),
        upload_success_rate: percentage(
            conversations_uploaded.min(files_processed),
            files_processed,
        ),
        start_time: stats.start_time,
        end_time: stats.end_time,
        duration_seconds: stats.duration_seconds(),
        successful_files,
        failed_files,
        ingest: ingest.cloned(),
    }
}

/// Write `report` under `{output_prefix}/run_summary_{timestamp}.json`.
///
/// # Errors
///
/// Returns an error when the report cannot be serialised or uploaded.
pub async fn persist_report(
    store: &dyn ObjectStore,
    report: &RunReport,
    output_prefix: &str,
) -> AppResult<String> {
    let stamp = report
        .end_time
        .unwrap_or_else(Utc::now)
        .format("%Y%m%d_%H%M%S");
    let key = output_key(output_prefix, &format!("run_summary_{stamp}.json"));
    let body = report.to_json()?;
    let uri = store
        .upload(body.into_bytes(), &key, "application/json")
        .await
        .map_err(|err| AppError::backend("report.persist", err))?;
    info!(uri = %uri, "run summary persisted");
    Ok(uri)
}
