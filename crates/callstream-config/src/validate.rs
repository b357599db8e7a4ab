//! Validation rules applied after a document is parsed.

use crate::error::{ConfigError, ConfigResult};
use crate::model::PipelineConfig;

pub(crate) fn validate(config: &PipelineConfig) -> ConfigResult<()> {
    require_non_empty("root", "project_id", &config.project_id)?;

    require_non_empty(
        "store",
        "input_root",
        &config.store.input_root.to_string_lossy(),
    )?;
    require_non_empty(
        "store",
        "output_root",
        &config.store.output_root.to_string_lossy(),
    )?;
    if config.store.audio_extensions.is_empty() {
        return Err(ConfigError::invalid(
            "store",
            "audio_extensions",
            "must_not_be_empty",
            None,
        ));
    }
    if let Some(ext) = config
        .store
        .audio_extensions
        .iter()
        .find(|ext| !ext.starts_with('.') || ext.len() < 2)
    {
        return Err(ConfigError::invalid(
            "store",
            "audio_extensions",
            "must_start_with_dot",
            Some(ext.clone()),
        ));
    }

    require_url("recognizer", "endpoint", &config.recognizer.endpoint)?;
    require_non_empty(
        "recognizer",
        "language_code",
        &config.recognizer.language_code,
    )?;
    if config.recognizer.min_speakers > config.recognizer.max_speakers {
        return Err(ConfigError::invalid(
            "recognizer",
            "min_speakers",
            "exceeds_max_speakers",
            Some(config.recognizer.min_speakers.to_string()),
        ));
    }

    require_url("redaction", "endpoint", &config.redaction.endpoint)?;

    let ingest = &config.ingest;
    require_url("ingest", "endpoint", &ingest.endpoint)?;
    require_non_empty("ingest", "location", &ingest.location)?;
    require_positive("ingest", "ttl_days", u64::from(ingest.ttl_days))?;
    require_positive("ingest", "lro_timeout_secs", ingest.lro_timeout_secs)?;
    require_positive("ingest", "poll_interval_secs", ingest.poll_interval_secs)?;
    require_positive(
        "ingest",
        "quota_max_attempts",
        u64::from(ingest.quota_max_attempts),
    )?;
    if ingest.quota_initial_delay_secs > ingest.quota_max_delay_secs {
        return Err(ConfigError::invalid(
            "ingest",
            "quota_initial_delay_secs",
            "exceeds_max_delay",
            Some(ingest.quota_initial_delay_secs.to_string()),
        ));
    }
    if ingest.agent_channel == ingest.customer_channel {
        return Err(ConfigError::invalid(
            "ingest",
            "agent_channel",
            "must_differ_from_customer_channel",
            Some(ingest.agent_channel.to_string()),
        ));
    }

    let processing = &config.processing;
    require_positive(
        "processing",
        "max_concurrent_files",
        processing.max_concurrent_files as u64,
    )?;
    require_positive(
        "processing",
        "chunk_concurrency",
        processing.chunk_concurrency as u64,
    )?;
    require_positive(
        "processing",
        "retry_max_attempts",
        u64::from(processing.retry_max_attempts),
    )?;
    require_positive("processing", "call_timeout_secs", processing.call_timeout_secs)?;
    if processing.retry_base_delay_ms > processing.retry_max_delay_ms {
        return Err(ConfigError::invalid(
            "processing",
            "retry_base_delay_ms",
            "exceeds_max_delay",
            Some(processing.retry_base_delay_ms.to_string()),
        ));
    }
    if processing.batch_timeout_secs == Some(0) {
        return Err(ConfigError::invalid(
            "processing",
            "batch_timeout_secs",
            "must_be_positive",
            Some("0".into()),
        ));
    }
    if processing.file_limit == Some(0) {
        return Err(ConfigError::invalid(
            "processing",
            "file_limit",
            "must_be_positive",
            Some("0".into()),
        ));
    }

    if let Some(format) = config.logging.format.as_deref()
        && !matches!(format, "json" | "pretty")
    {
        return Err(ConfigError::invalid(
            "logging",
            "format",
            "unknown_format",
            Some(format.to_string()),
        ));
    }

    Ok(())
}

fn require_non_empty(section: &'static str, field: &'static str, value: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(section, field, "must_not_be_empty", None));
    }
    Ok(())
}

fn require_url(section: &'static str, field: &'static str, value: &str) -> ConfigResult<()> {
    require_non_empty(section, field, value)?;
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::invalid(
            section,
            field,
            "must_be_http_url",
            Some(value.to_string()),
        ));
    }
    Ok(())
}

fn require_positive(section: &'static str, field: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(
            section,
            field,
            "must_be_positive",
            Some("0".into()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::parse_config;

    const BASE: &str = r"
project_id: demo
store:
  input_root: /data/in
  output_root: /data/out
recognizer:
  endpoint: https://speech.local
redaction:
  endpoint: https://dlp.local
ingest:
  endpoint: https://insights.local
";

    fn parse(extra: &str) -> ConfigResult<PipelineConfig> {
        parse_config(&format!("{BASE}{extra}"), |_| None)
    }

    fn reason_of(result: ConfigResult<PipelineConfig>) -> Option<(&'static str, &'static str)> {
        match result {
            Err(ConfigError::InvalidField { field, reason, .. }) => Some((field, reason)),
            _ => None,
        }
    }

    #[test]
    fn minimal_document_is_valid() -> anyhow::Result<()> {
        let config = parse("")?;
        validate(&config)?;
        Ok(())
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = parse("processing:\n  max_concurrent_files: 0\n");
        assert_eq!(
            reason_of(result),
            Some(("max_concurrent_files", "must_be_positive"))
        );
    }

    #[test]
    fn base_delay_above_ceiling_is_rejected() {
        let result = parse("processing:\n  retry_base_delay_ms: 90000\n");
        assert_eq!(
            reason_of(result),
            Some(("retry_base_delay_ms", "exceeds_max_delay"))
        );
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let result = parse("logging:\n  format: xml\n");
        assert_eq!(reason_of(result), Some(("format", "unknown_format")));
    }

    #[test]
    fn extension_without_dot_is_rejected() {
        let yaml = BASE.replace(
            "  output_root: /data/out\n",
            "  output_root: /data/out\n  audio_extensions: [wav]\n",
        );
        let result = parse_config(&yaml, |_| None);
        assert_eq!(
            reason_of(result),
            Some(("audio_extensions", "must_start_with_dot"))
        );
    }

    #[test]
    fn non_http_endpoint_is_rejected() {
        let yaml = BASE.replace("https://dlp.local", "dlp.local");
        let result = parse_config(&yaml, |_| None);
        assert_eq!(reason_of(result), Some(("endpoint", "must_be_http_url")));
    }
}
