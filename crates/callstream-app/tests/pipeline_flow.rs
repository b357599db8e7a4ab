use std::sync::Arc;
use std::time::Duration;

use callstream_app::adapters::{DefaultConversationFormatter, FormatterSettings, FsObjectStore};
use callstream_app::discovery::discover;
use callstream_app::pipeline::PipelineSettings;
use callstream_app::{
    Collaborators, FilePipeline, PipelineDriver, RunStatistics, StageKind, summarize,
};
use callstream_config::{ProcessingMode, ProcessingSettings, StoreSettings};
use callstream_core::BackendErrorKind;
use callstream_events::{Event, EventBus};
use callstream_runtime::{Retrier, RetryPolicy};
use callstream_telemetry::Metrics;
use callstream_test_support::fixtures::recognition_config;
use callstream_test_support::{EchoRedactor, InFlightProbe, ScriptedBackend, ScriptedRecognizer};
use chrono::Utc;
use tempfile::TempDir;

fn store_settings(root: &TempDir) -> StoreSettings {
    StoreSettings {
        input_root: root.path().join("in"),
        output_root: root.path().join("out"),
        input_prefix: "calls/".into(),
        file_prefix_filter: "merged".into(),
        audio_extensions: vec![".wav".into(), ".mp3".into()],
        output_prefix: "processed".into(),
        scratch_dir: Some(root.path().join("scratch")),
    }
}

#[tokio::test]
async fn manual_run_over_local_store() -> anyhow::Result<()> {
    let root = TempDir::new()?;
    let calls = root.path().join("in/calls");
    std::fs::create_dir_all(&calls)?;
    for i in 0..5 {
        std::fs::write(calls.join(format!("merged_{i}.wav")), format!("RIFF-{i}"))?;
    }
    std::fs::write(calls.join("readme.txt"), b"skip me")?;
    std::fs::write(calls.join("other_9.wav"), b"skip me too")?;

    let settings = store_settings(&root);
    let store = Arc::new(FsObjectStore::from_settings(&settings)?);
    let probe = InFlightProbe::new();
    let recognizer = Arc::new(
        ScriptedRecognizer::new()
            .with_latency(Duration::from_millis(20))
            .with_probe(probe.clone()),
    );
    recognizer.fail_always("merged_3", BackendErrorKind::PermissionDenied);
    let backend = Arc::new(ScriptedBackend::new());
    let metrics = Metrics::new()?;
    let events = EventBus::new();

    let collaborators = Collaborators {
        store: store.clone(),
        recognizer: recognizer.clone(),
        redactor: Arc::new(EchoRedactor::new()),
        formatter: Arc::new(DefaultConversationFormatter::new(FormatterSettings::default())),
        backend: backend.clone(),
    };
    let pipeline = FilePipeline::new(
        collaborators,
        PipelineSettings {
            recognition: recognition_config(),
            output_prefix: settings.output_prefix.clone(),
            call_timeout: Duration::from_secs(5),
        },
        Retrier::new(RetryPolicy::new(3, Duration::from_millis(5)), metrics.clone()),
        metrics.clone(),
        events.clone(),
    );
    let processing = ProcessingSettings {
        max_concurrent_files: 2,
        chunk_concurrency: 1,
        ..ProcessingSettings::default()
    };
    let driver = PipelineDriver::from_settings(pipeline, &processing, metrics.clone());

    let items = discover(store.as_ref(), &settings, None).await?;
    assert_eq!(items.len(), 5);

    let mut stats = RunStatistics::new(ProcessingMode::Manual);
    stats.record_discovered(items.len());
    stats.start(Utc::now());
    let results = driver.run(items, &mut stats).await;
    stats.finish(Utc::now());

    assert_eq!(results.len(), 5);
    let sources: Vec<&str> = results.iter().map(|r| r.source.as_str()).collect();
    assert_eq!(
        sources,
        vec![
            "calls/merged_0.wav",
            "calls/merged_1.wav",
            "calls/merged_2.wav",
            "calls/merged_3.wav",
            "calls/merged_4.wav",
        ]
    );
    let failed: Vec<_> = results.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].source, "calls/merged_3.wav");
    assert_eq!(failed[0].steps_completed, vec![StageKind::Download]);
    assert_eq!(failed[0].failed_stage, Some(StageKind::Transcription));
    assert!(probe.max_observed() <= 2, "saw {} concurrent calls", probe.max_observed());

    assert_eq!(stats.files_processed, 4);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(backend.created().len(), 4);
    assert_eq!(std::fs::read_dir(root.path().join("scratch"))?.count(), 0);
    let record: serde_json::Value = serde_json::from_slice(&std::fs::read(
        root.path().join("out/processed/processed_merged_0.json"),
    )?)?;
    assert_eq!(record["source_size_bytes"], 6);
    assert_eq!(
        record["source_checksum"],
        "0b1d3f657d33b7205b1a1e3cba90badf5b4c3b624beea55e2f680219c3f207bc"
    );
    assert_eq!(record["labels"]["source_file"], "calls/merged_0.wav");

    let report = summarize(&stats, &results, None);
    assert!((report.success_rate - 80.0).abs() < f64::EPSILON);
    assert_eq!(report.failed_files.len(), 1);
    assert_eq!(report.exit_code(), 1);

    let failures = events
        .backlog_since(0)
        .into_iter()
        .filter(|envelope| matches!(envelope.event, Event::FileFailed { .. }))
        .count();
    assert_eq!(failures, 1);
    Ok(())
}

