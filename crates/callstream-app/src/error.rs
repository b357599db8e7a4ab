//! # Design
//!
//! - Centralize run-level errors for bootstrap, discovery, and the drivers.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use callstream_config::ConfigError;
use callstream_core::BackendError;
use callstream_runtime::RuntimeError;
use callstream_telemetry::TelemetryError;
use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ConfigError,
    },
    /// Telemetry setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: TelemetryError,
    },
    /// A collaborator call needed before any file could run failed.
    #[error("collaborator operation failed")]
    Backend {
        /// Operation identifier.
        operation: &'static str,
        /// Source backend error.
        source: BackendError,
    },
    /// Bulk ingestion aborted.
    #[error("bulk ingestion failed")]
    Ingest {
        /// Operation identifier.
        operation: &'static str,
        /// Source orchestration error.
        source: RuntimeError,
    },
    /// A report could not be serialised.
    #[error("serialisation failed")]
    Serialize {
        /// Operation identifier.
        operation: &'static str,
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// HTTP client construction failed.
    #[error("http operation failed")]
    Http {
        /// Operation identifier.
        operation: &'static str,
        /// Base URL the client was built for.
        url: String,
        /// Source HTTP client error.
        source: reqwest::Error,
    },
    /// Values supplied at run time were invalid.
    #[error("invalid configuration")]
    InvalidConfig {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Optional value associated with the failure.
        value: Option<String>,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(operation: &'static str, source: TelemetryError) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn backend(operation: &'static str, source: BackendError) -> Self {
        Self::Backend { operation, source }
    }

    pub(crate) const fn ingest(operation: &'static str, source: RuntimeError) -> Self {
        Self::Ingest { operation, source }
    }

    pub(crate) const fn serialize(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Serialize { operation, source }
    }

    pub(crate) const fn io(
        operation: &'static str,
        path: Option<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }

    pub(crate) const fn http(operation: &'static str, url: String, source: reqwest::Error) -> Self {
        Self::Http {
            operation,
            url,
            source,
        }
    }

    /// Operation identifier, when the variant carries one.
    #[must_use]
    pub const fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Config { operation, .. }
            | Self::Telemetry { operation, .. }
            | Self::Backend { operation, .. }
            | Self::Ingest { operation, .. }
            | Self::Serialize { operation, .. }
            | Self::Io { operation, .. }
            | Self::Http { operation, .. } => Some(operation),
            Self::InvalidConfig { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstream_core::BackendErrorKind;
    use std::error::Error as _;

    #[test]
    fn constructors_keep_operation_and_source() {
        let err = AppError::backend(
            "discovery.list",
            BackendError::new(BackendErrorKind::PermissionDenied, "store.list", "denied"),
        );
        assert_eq!(err.to_string(), "collaborator operation failed");
        assert_eq!(err.operation(), Some("discovery.list"));
        assert!(err.source().is_some());

        let err = AppError::io(
            "report.persist",
            Some(PathBuf::from("/tmp/out")),
            io::Error::other("disk full"),
        );
        assert_eq!(err.operation(), Some("report.persist"));
        assert!(matches!(err, AppError::Io { path: Some(_), .. }));
    }

    #[test]
    fn invalid_config_has_no_operation() {
        let err = AppError::InvalidConfig {
            field: "file_limit",
            reason: "must_be_positive",
            value: Some("0".into()),
        };
        assert_eq!(err.to_string(), "invalid configuration");
        assert_eq!(err.operation(), None);
        assert!(err.source().is_none());
    }
}
