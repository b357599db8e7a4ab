use std::sync::Arc;
use std::time::Instant;

use callstream_config::{PipelineConfig, ProcessingMode, load_config};
use callstream_core::{
    ConversationFormatter, IngestionBackend, ObjectStore, RedactionService, SpeechRecognizer,
};
use callstream_events::{Event, EventBus};
use callstream_runtime::{IngestOutcome, Retrier, RetryPolicy};
use callstream_telemetry::{GlobalContextGuard, LogFormat, LoggingConfig, Metrics, init_logging};
use chrono::Utc;
use tracing::{info, warn};

use crate::adapters::{
    DefaultConversationFormatter, FormatterSettings, FsObjectStore, HttpIngestionBackend,
    HttpRedactionService, HttpSpeechRecognizer,
};
use crate::cli::Cli;
use crate::direct::DirectIngestDriver;
use crate::discovery::discover;
use crate::error::{AppError, AppResult};
use crate::event_log::spawn_event_logger;
use crate::pipeline::{
    Collaborators, FilePipeline, PipelineDriver, PipelineFileResult, PipelineSettings,
    recognition_config,
};
use crate::report::{RunReport, RunStatistics, persist_report, summarize};
use crate::validate::{SetupReport, validate_setup};

/// Dependencies required to run one pass over the configured store.
pub struct BootstrapDependencies {
    config: PipelineConfig,
    collaborators: Collaborators,
    events: EventBus,
    metrics: Metrics,
    install_logging: bool,
}

impl BootstrapDependencies {
    /// Production dependencies: filesystem store and HTTP collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error when the store directories or HTTP clients cannot be
    /// created, or the metrics registry fails to initialise.
    pub fn from_config(config: PipelineConfig) -> AppResult<Self> {
        let timeout = config.processing.call_timeout();
        let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::from_settings(&config.store)?);
        let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(HttpSpeechRecognizer::from_settings(
            &config.recognizer,
            timeout,
        )?);
        let redactor: Arc<dyn RedactionService> = Arc::new(HttpRedactionService::from_settings(
            &config.redaction,
            timeout,
        )?);
        let backend: Arc<dyn IngestionBackend> =
            Arc::new(HttpIngestionBackend::from_settings(&config.ingest, timeout)?);
        let formatter: Arc<dyn ConversationFormatter> = Arc::new(
            DefaultConversationFormatter::new(FormatterSettings::from_config(&config)),
        );
        let collaborators = Collaborators {
            store,
            recognizer,
            redactor,
            formatter,
            backend,
        };
        let mut dependencies = Self::with_collaborators(config, collaborators)?;
        dependencies.install_logging = true;
        Ok(dependencies)
    }

    /// Dependencies around injected collaborators; logging is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns an error when the metrics registry fails to initialise.
    pub fn with_collaborators(
        config: PipelineConfig,
        collaborators: Collaborators,
    ) -> AppResult<Self> {
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;
        Ok(Self {
            config,
            collaborators,
            events: EventBus::new(),
            metrics,
            install_logging: false,
        })
    }

    /// Bus the run publishes progress events on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics registry shared by every component of the run.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// What a finished invocation produced.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// `--validate-only` ran the setup checks.
    Validation(SetupReport),
    /// Files were processed and summarised.
    Completed(RunReport),
}

impl RunOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(report) => u8::from(!report.all_passed()),
            Self::Completed(report) => report.exit_code(),
        }
    }
}

/// Entry point for the `callstream` binary.
///
/// # Errors
///
/// Returns an error when the configuration cannot be loaded, dependencies
/// cannot be constructed, or the run aborts.
pub async fn run_app(cli: Cli) -> AppResult<RunOutcome> {
    let mut config =
        load_config(&cli.config).map_err(|err| AppError::config("config.load", err))?;
    cli.apply_overrides(&mut config)?;
    let dependencies = BootstrapDependencies::from_config(config)?;
    Box::pin(run_app_with(dependencies, cli.validate_only)).await
}

/// Run sequence that relies entirely on injected dependencies.
///
/// # Errors
///
/// Returns an error when logging cannot be installed, discovery fails, or
/// direct ingestion aborts. Per-file failures are reported, not returned.
pub async fn run_app_with(
    dependencies: BootstrapDependencies,
    validate_only: bool,
) -> AppResult<RunOutcome> {
    let BootstrapDependencies {
        config,
        collaborators,
        events,
        metrics,
        install_logging,
    } = dependencies;

    if install_logging {
        let defaults = LoggingConfig::default();
        init_logging(&LoggingConfig {
            level: &config.logging.level,
            format: LogFormat::from_name(config.logging.format.as_deref()),
            build_sha: defaults.build_sha,
        })
        .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    }

    let mode = config.processing.mode;
    let mut stats = RunStatistics::new(mode);
    let _context = GlobalContextGuard::new(mode.as_str(), stats.run_id.to_string());

    if validate_only {
        info!("validating collaborator setup");
        let report = validate_setup(
            &collaborators,
            &recognition_config(&config),
            config.processing.call_timeout(),
        )
        .await;
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|err| AppError::serialize("validate.render", err))?;
        println!("{rendered}");
        return Ok(RunOutcome::Validation(report));
    }

    info!("callstream run starting");
    let started = Instant::now();
    let logger = spawn_event_logger(&events, metrics.clone());
    stats.start(Utc::now());

    let items = discover(
        collaborators.store.as_ref(),
        &config.store,
        config.processing.file_limit,
    )
    .await
    .map_err(|err| AppError::backend("discovery.list", err))?;
    stats.record_discovered(items.len());
    let _ = events.publish(Event::RunStarted {
        mode: mode.as_str().to_string(),
        files: items.len(),
    });

    let processing = &config.processing;
    let retrier = Retrier::new(
        RetryPolicy::new(processing.retry_max_attempts, processing.retry_base_delay())
            .with_max_delay(processing.retry_max_delay()),
        metrics.clone(),
    );

    let (results, ingest): (Vec<PipelineFileResult>, Option<IngestOutcome>) = match mode {
        ProcessingMode::Manual => {
            let pipeline = FilePipeline::new(
                collaborators.clone(),
                PipelineSettings::from_config(&config),
                retrier,
                metrics.clone(),
                events.clone(),
            );
            let driver = PipelineDriver::from_settings(pipeline, processing, metrics.clone());
            (driver.run(items, &mut stats).await, None)
        }
        ProcessingMode::Direct => {
            let driver = DirectIngestDriver::from_config(
                &config,
                Arc::clone(&collaborators.store),
                Arc::clone(&collaborators.backend),
                retrier,
                metrics.clone(),
                events.clone(),
            );
            let outcome = driver.run(&items, &mut stats).await;
            if outcome.is_err() {
                logger.abort();
            }
            (Vec::new(), outcome?)
        }
    };

    stats.finish(Utc::now());
    let _ = events.publish(Event::RunCompleted {
        files_processed: stats.files_processed,
        files_failed: stats.files_failed,
    });

    let report = summarize(&stats, &results, ingest.as_ref());
    println!("{}", report.to_json()?);
    if processing.persist_summary
        && let Err(err) = persist_report(
            collaborators.store.as_ref(),
            &report,
            &config.store.output_prefix,
        )
        .await
    {
        warn!(
            error = %err,
            operation = err.operation().unwrap_or("report.persist"),
            "failed to persist run summary"
        );
    }

    metrics.observe_run_duration(started.elapsed());
    info!(
        files_discovered = report.files_discovered,
        files_processed = report.files_processed,
        files_failed = report.files_failed,
        conversations_uploaded = report.conversations_uploaded,
        success_rate = report.success_rate,
        "callstream run finished"
    );
    logger.abort();
    Ok(RunOutcome::Completed(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstream_config::parse_config;
    use callstream_core::BackendErrorKind;
    use callstream_runtime::RuntimeError;
    use callstream_test_support::{
        EchoRedactor, MemoryObjectStore, ScriptedBackend, ScriptedRecognizer,
    };

    const CONFIG: &str = r"
project_id: test-project
store:
  input_root: /in
  output_root: /out
  input_prefix: calls/
recognizer:
  endpoint: https://speech.local
redaction:
  endpoint: https://dlp.local
ingest:
  endpoint: https://insights.local
processing:
  max_concurrent_files: 2
  chunk_concurrency: 2
  retry_base_delay_ms: 10
  retry_max_delay_ms: 100
";

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        recognizer: Arc<ScriptedRecognizer>,
        backend: Arc<ScriptedBackend>,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let store = Arc::new(MemoryObjectStore::new()?);
            for name in ["merged_a.wav", "merged_b.wav", "merged_c.wav", "notes.txt"] {
                store.insert(&format!("calls/{name}"), b"RIFF0000WAVE");
            }
            Ok(Self {
                store,
                recognizer: Arc::new(ScriptedRecognizer::new()),
                backend: Arc::new(ScriptedBackend::new()),
            })
        }

        fn dependencies(&self, mode: ProcessingMode) -> anyhow::Result<BootstrapDependencies> {
            let mut config = parse_config(CONFIG, |_| None)?;
            config.processing.mode = mode;
            let collaborators = Collaborators {
                store: self.store.clone(),
                recognizer: self.recognizer.clone(),
                redactor: Arc::new(EchoRedactor::new()),
                formatter: Arc::new(DefaultConversationFormatter::new(
                    FormatterSettings::from_config(&config),
                )),
                backend: self.backend.clone(),
            };
            Ok(BootstrapDependencies::with_collaborators(config, collaborators)?)
        }
    }

    #[tokio::test]
    async fn manual_run_reports_and_persists_summary() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fixture
            .recognizer
            .fail_always("merged_b", BackendErrorKind::InvalidRequest);
        let dependencies = fixture.dependencies(ProcessingMode::Manual)?;
        let metrics = dependencies.metrics().clone();
        let mut stream = dependencies.events().subscribe(None);

        let outcome = run_app_with(dependencies, false).await?;

        assert_eq!(outcome.exit_code(), 1);
        let RunOutcome::Completed(report) = outcome else {
            anyhow::bail!("expected a completed run");
        };
        assert_eq!(report.files_discovered, 3);
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.conversations_uploaded, 2);
        assert_eq!(report.failed_files[0].source, "calls/merged_b.wav");
        assert!(report.duration_seconds.is_some());

        let uploaded = fixture.store.uploaded_keys();
        assert!(uploaded.iter().any(|key| key.starts_with("processed/run_summary_")));
        assert_eq!(
            uploaded
                .iter()
                .filter(|key| key.starts_with("processed/processed_merged_"))
                .count(),
            2
        );
        assert_eq!(fixture.backend.created().len(), 2);
        assert_eq!(metrics.pipeline_steps("upload", "completed"), 2);

        let first = stream
            .next()
            .await
            .ok_or_else(|| anyhow::anyhow!("no events published"))?;
        assert!(matches!(first.event, Event::RunStarted { files: 3, .. }));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn direct_run_submits_every_discovered_file() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fixture.backend.push_submit(Err(callstream_core::BackendError::new(
            BackendErrorKind::InvalidRequest,
            "ingest.submit_bulk",
            "0 failed and 3 were skipped as they already exist",
        )));
        let dependencies = fixture.dependencies(ProcessingMode::Direct)?;

        let outcome = run_app_with(dependencies, false).await?;

        assert_eq!(outcome.exit_code(), 0);
        let RunOutcome::Completed(report) = outcome else {
            anyhow::bail!("expected a completed run");
        };
        assert_eq!(report.files_processed, 3);
        assert_eq!(report.conversations_uploaded, 3);
        assert_eq!(report.ingest.as_ref().map(IngestOutcome::kind), Some("all_duplicates"));
        let requests = fixture.backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].object_uris.len(), 3);
        assert_eq!(
            requests[0].recognizer,
            "projects/test-project/locations/global/recognizers/_"
        );
        assert_eq!(fixture.recognizer.calls(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn direct_run_aborts_on_recognizer_rejection() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fixture.backend.push_submit(Err(callstream_core::BackendError::new(
            BackendErrorKind::RecognizerConfig,
            "ingest.submit_bulk",
            "400: recognizer not found",
        )));
        let dependencies = fixture.dependencies(ProcessingMode::Direct)?;

        let err = run_app_with(dependencies, false).await.err();

        assert!(matches!(
            err,
            Some(AppError::Ingest {
                source: RuntimeError::RecognizerConfig { .. },
                ..
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn validate_only_skips_processing() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        fixture.backend.set_unhealthy();
        let dependencies = fixture.dependencies(ProcessingMode::Manual)?;

        let outcome = run_app_with(dependencies, true).await?;

        assert_eq!(outcome.exit_code(), 1);
        let RunOutcome::Validation(report) = outcome else {
            anyhow::bail!("expected a validation report");
        };
        assert_eq!(report.check("ingest_access").map(|c| c.passed), Some(false));
        assert_eq!(fixture.store.download_count(), 0);
        assert!(fixture.store.uploaded_keys().is_empty());
        Ok(())
    }
}
