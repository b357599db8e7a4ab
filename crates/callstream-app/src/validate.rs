//! Pre-flight checks run by `--validate-only`.

use std::time::Duration;

use callstream_core::{BackendResult, RecognitionConfig};
use callstream_runtime::with_timeout;
use serde::Serialize;
use tracing::{error, info};

use crate::pipeline::Collaborators;

/// Outcome of one named check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupCheck {
    /// Check name.
    pub name: &'static str,
    /// Whether the collaborator answered.
    pub passed: bool,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Every check run against the configured collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupReport {
    /// Checks in execution order.
    pub checks: Vec<SetupCheck>,
}

impl SetupReport {
    /// True when no check failed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// Look up a check by name.
    #[must_use]
    pub fn check(&self, name: &str) -> Option<&SetupCheck> {
        self.checks.iter().find(|check| check.name == name)
    }
}

/// Probe the store, recognizer, redaction templates, and ingestion backend.
///
/// Every check runs even when an earlier one fails.
pub async fn validate_setup(
    collaborators: &Collaborators,
    recognition: &RecognitionConfig,
    timeout: Duration,
) -> SetupReport {
    let checks = vec![
        run_check(
            "store_access",
            with_timeout("store.health_check", timeout, collaborators.store.health_check()).await,
        ),
        run_check(
            "recognizer_config",
            with_timeout(
                "recognizer.health_check",
                timeout,
                collaborators.recognizer.health_check(recognition),
            )
            .await,
        ),
        run_check(
            "redaction_templates",
            with_timeout(
                "redaction.health_check",
                timeout,
                collaborators.redactor.health_check(),
            )
            .await,
        ),
        run_check(
            "ingest_access",
            with_timeout("ingest.health_check", timeout, collaborators.backend.health_check())
                .await,
        ),
    ];
    let report = SetupReport { checks };
    if report.all_passed() {
        info!("setup validation passed");
    } else {
        error!("setup validation failed");
    }
    report
}

fn run_check(name: &'static str, result: BackendResult<()>) -> SetupCheck {
    match result {
        Ok(()) => {
            info!(check = name, "setup check passed");
            SetupCheck {
                name,
                passed: true,
                detail: None,
            }
        }
        Err(err) => {
            let detail = format!("{err}: {}", err.detail());
            error!(
                check = name,
                kind = err.kind().as_str(),
                detail = %detail,
                "setup check failed"
            );
            SetupCheck {
                name,
                passed: false,
                detail: Some(detail),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DefaultConversationFormatter, FormatterSettings};
    use callstream_test_support::fixtures::recognition_config;
    use callstream_test_support::{
        EchoRedactor, MemoryObjectStore, ScriptedBackend, ScriptedRecognizer,
    };
    use std::sync::Arc;

    fn collaborators(
        recognizer: Arc<ScriptedRecognizer>,
        backend: Arc<ScriptedBackend>,
    ) -> anyhow::Result<Collaborators> {
        Ok(Collaborators {
            store: Arc::new(MemoryObjectStore::new()?),
            recognizer,
            redactor: Arc::new(EchoRedactor::new()),
            formatter: Arc::new(DefaultConversationFormatter::new(FormatterSettings::default())),
            backend,
        })
    }

    #[tokio::test]
    async fn healthy_collaborators_pass_every_check() -> anyhow::Result<()> {
        let collaborators = collaborators(
            Arc::new(ScriptedRecognizer::new()),
            Arc::new(ScriptedBackend::new()),
        )?;
        let report =
            validate_setup(&collaborators, &recognition_config(), Duration::from_secs(5)).await;
        assert!(report.all_passed());
        let names: Vec<&str> = report.checks.iter().map(|check| check.name).collect();
        assert_eq!(
            names,
            vec!["store_access", "recognizer_config", "redaction_templates", "ingest_access"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_reported_per_check() -> anyhow::Result<()> {
        let recognizer = Arc::new(ScriptedRecognizer::new());
        recognizer.reject_health_check();
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_unhealthy();
        let collaborators = collaborators(recognizer, backend)?;

        let report =
            validate_setup(&collaborators, &recognition_config(), Duration::from_secs(5)).await;

        assert!(!report.all_passed());
        assert_eq!(report.check("store_access").map(|c| c.passed), Some(true));
        assert_eq!(report.check("redaction_templates").map(|c| c.passed), Some(true));
        let recognizer = report
            .check("recognizer_config")
            .ok_or_else(|| anyhow::anyhow!("missing recognizer check"))?;
        assert!(!recognizer.passed);
        assert!(
            recognizer
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("recognizer not found"))
        );
        assert_eq!(report.check("ingest_access").map(|c| c.passed), Some(false));

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["checks"][0]["name"], "store_access");
        assert!(json["checks"][0].get("detail").is_none());
        Ok(())
    }
}
