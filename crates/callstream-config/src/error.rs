//! Error types for configuration loading and validation.
//!
//! # Design
//! - Messages are constant; the offending section, field, and value travel as
//!   structured fields so logs stay queryable.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The configuration document was not valid YAML for the expected model.
    #[error("failed to parse configuration document")]
    Parse {
        /// Path of the document when loaded from disk.
        path: Option<PathBuf>,
        /// Underlying YAML error.
        source: serde_yaml::Error,
    },
    /// A `${VAR}` reference had no value and no default.
    #[error("missing environment variable referenced by configuration")]
    MissingEnv {
        /// Name of the unresolved variable.
        name: String,
    },
    /// A field failed validation.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section containing the field.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// An internal pattern failed to compile.
    #[error("failed to compile configuration pattern")]
    Pattern {
        /// Underlying regex error.
        source: regex::Error,
    },
}

impl ConfigError {
    pub(crate) const fn invalid(
        section: &'static str,
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            reason,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn invalid_field_keeps_context_out_of_message() {
        let err = ConfigError::invalid(
            "processing",
            "max_concurrent_files",
            "must_be_positive",
            Some("0".into()),
        );
        assert_eq!(err.to_string(), "invalid configuration field");
        match err {
            ConfigError::InvalidField {
                section,
                field,
                reason,
                value,
            } => {
                assert_eq!(section, "processing");
                assert_eq!(field, "max_concurrent_files");
                assert_eq!(reason, "must_be_positive");
                assert_eq!(value.as_deref(), Some("0"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn io_error_exposes_source() {
        let err = ConfigError::Io {
            path: PathBuf::from("config.yaml"),
            source: io::Error::other("boom"),
        };
        assert_eq!(err.to_string(), "failed to read configuration file");
        assert!(err.source().is_some());
    }
}
