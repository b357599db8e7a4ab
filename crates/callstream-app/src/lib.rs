#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Callstream application wiring.
//!
//! Layout: `bootstrap.rs` (dependency wiring and the run sequence),
//! `pipeline.rs` (per-file stages and the manual driver), `direct.rs` (bulk
//! ingestion driver), `report.rs` (statistics and the run report),
//! `adapters/` (filesystem and HTTP collaborators).

pub mod adapters;
/// Dependency construction and the run sequence.
pub mod bootstrap;
pub mod cli;
pub mod direct;
pub mod discovery;
pub mod error;
pub mod event_log;
pub mod pipeline;
pub mod report;
pub mod validate;

pub use bootstrap::{BootstrapDependencies, RunOutcome, run_app, run_app_with};
pub use cli::Cli;
pub use error::{AppError, AppResult};
pub use pipeline::{Collaborators, FilePipeline, PipelineDriver, PipelineFileResult, StageKind};
pub use report::{RunReport, RunStatistics, summarize};
