//! Command-line surface of the `callstream` binary.

use std::path::PathBuf;

use callstream_config::{PipelineConfig, ProcessingMode};
use clap::{Parser, ValueEnum};

use crate::error::{AppError, AppResult};

/// Default configuration location.
pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "callstream",
    version,
    about = "Transcribe, redact, and ingest call recordings into the analytics backend"
)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "CALLSTREAM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Check collaborator access and exit without processing files.
    #[arg(long)]
    pub validate_only: bool,
    /// Process at most this many files.
    #[arg(long)]
    pub file_limit: Option<usize>,
    /// Override the configured processing mode.
    #[arg(long, value_enum)]
    pub processing_mode: Option<ModeArg>,
    /// Override the configured log format.
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormatArg>,
}

/// Processing mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Local transcription, redaction, and per-file upload.
    Manual,
    /// Server-side bulk ingestion.
    Direct,
}

impl From<ModeArg> for ProcessingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Manual => Self::Manual,
            ModeArg::Direct => Self::Direct,
        }
    }
}

/// Log format as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

impl LogFormatArg {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when `--file-limit` is zero.
    pub fn apply_overrides(&self, config: &mut PipelineConfig) -> AppResult<()> {
        if let Some(limit) = self.file_limit {
            if limit == 0 {
                return Err(AppError::InvalidConfig {
                    field: "file_limit",
                    reason: "must_be_positive",
                    value: Some(limit.to_string()),
                });
            }
            config.processing.file_limit = Some(limit);
        }
        if let Some(mode) = self.processing_mode {
            config.processing.mode = mode.into();
        }
        if let Some(format) = self.log_format {
            config.logging.format = Some(format.as_str().to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstream_config::parse_config;

    fn config() -> anyhow::Result<PipelineConfig> {
        let raw = r"
project_id: test-project
store:
  input_root: /in
  output_root: /out
recognizer:
  endpoint: https://speech.local
redaction:
  endpoint: https://dlp.local
ingest:
  endpoint: https://insights.local
";
        Ok(parse_config(raw, |_| None)?)
    }

    #[test]
    fn defaults_point_at_the_standard_config() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["callstream"])?;
        if std::env::var_os("CALLSTREAM_CONFIG").is_none() {
            assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        }
        assert!(!cli.validate_only);
        assert_eq!(cli.file_limit, None);
        assert_eq!(cli.processing_mode, None);
        Ok(())
    }

    #[test]
    fn overrides_replace_configured_values() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "callstream",
            "--config",
            "/etc/callstream.yaml",
            "--file-limit",
            "5",
            "--processing-mode",
            "direct",
            "--log-format",
            "json",
            "--validate-only",
        ])?;
        assert_eq!(cli.config, PathBuf::from("/etc/callstream.yaml"));
        assert!(cli.validate_only);

        let mut config = config()?;
        assert_eq!(config.processing.mode, ProcessingMode::Manual);
        cli.apply_overrides(&mut config)?;
        assert_eq!(config.processing.file_limit, Some(5));
        assert_eq!(config.processing.mode, ProcessingMode::Direct);
        assert_eq!(config.logging.format.as_deref(), Some("json"));
        Ok(())
    }

    #[test]
    fn zero_file_limit_is_rejected() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["callstream", "--file-limit", "0"])?;
        let err = cli.apply_overrides(&mut config()?).err();
        assert!(matches!(
            err,
            Some(AppError::InvalidConfig {
                field: "file_limit",
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn unknown_mode_is_a_parse_error() {
        assert!(Cli::try_parse_from(["callstream", "--processing-mode", "batch"]).is_err());
    }
}
