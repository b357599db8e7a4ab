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
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Binary entrypoint: parse arguments, run one pass, and exit with the run status.

use std::process::ExitCode;

use callstream_app::{Cli, run_app};
use clap::Parser;

/// Runs callstream once and maps the outcome onto the process exit code.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            tracing::error!(
                error = %err,
                operation = err.operation().unwrap_or("run"),
                detail = ?err,
                "callstream run failed"
            );
            eprintln!("callstream: {err}: {err:?}");
            ExitCode::FAILURE
        }
    }
}
