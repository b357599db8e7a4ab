//! # Design
//!
//! - One error type for every collaborator call so the orchestration core can
//!   classify failures without knowing which vendor produced them.
//! - Messages are constant; the remote detail text travels in `detail` so
//!   adapters further up (duplicate detection) can still inspect it.

use std::time::Duration;

use thiserror::Error;

/// Result alias for collaborator calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Coarse classification of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// Network blips, 5xx responses, per-call timeouts.
    Transient,
    /// Rate limit or resource exhaustion (HTTP 429).
    QuotaExhausted,
    /// Caller lacks permission for the resource.
    PermissionDenied,
    /// The recognizer resource or its configuration was rejected.
    RecognizerConfig,
    /// The request itself was malformed or unsupported.
    InvalidRequest,
    /// The addressed resource does not exist.
    NotFound,
}

impl BackendErrorKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::QuotaExhausted => "quota_exhausted",
            Self::PermissionDenied => "permission_denied",
            Self::RecognizerConfig => "recognizer_config",
            Self::InvalidRequest => "invalid_request",
            Self::NotFound => "not_found",
        }
    }
}

/// Errors returned by collaborator adapters.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The call failed for a reason that may clear on retry.
    #[error("transient backend failure")]
    Transient {
        /// Operation identifier.
        operation: &'static str,
        /// Remote or transport detail.
        detail: String,
    },
    /// The call was rejected because a quota was exhausted.
    #[error("backend quota exhausted")]
    QuotaExhausted {
        /// Operation identifier.
        operation: &'static str,
        /// Remote detail.
        detail: String,
    },
    /// The caller lacks permission for the resource.
    #[error("backend permission denied")]
    PermissionDenied {
        /// Operation identifier.
        operation: &'static str,
        /// Remote detail.
        detail: String,
    },
    /// The recognizer rejected its configuration.
    #[error("recognizer configuration rejected")]
    RecognizerConfig {
        /// Operation identifier.
        operation: &'static str,
        /// Remote detail.
        detail: String,
    },
    /// The request was malformed or unsupported.
    #[error("backend rejected request")]
    InvalidRequest {
        /// Operation identifier.
        operation: &'static str,
        /// Remote detail.
        detail: String,
    },
    /// The addressed resource does not exist.
    #[error("backend resource not found")]
    NotFound {
        /// Operation identifier.
        operation: &'static str,
        /// Resource that was missing.
        detail: String,
    },
    /// The call did not finish within its deadline.
    #[error("backend call timed out")]
    Timeout {
        /// Operation identifier.
        operation: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },
}

impl BackendError {
    /// Build an error of the given kind.
    #[must_use]
    pub fn new(kind: BackendErrorKind, operation: &'static str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        match kind {
            BackendErrorKind::Transient => Self::Transient { operation, detail },
            BackendErrorKind::QuotaExhausted => Self::QuotaExhausted { operation, detail },
            BackendErrorKind::PermissionDenied => Self::PermissionDenied { operation, detail },
            BackendErrorKind::RecognizerConfig => Self::RecognizerConfig { operation, detail },
            BackendErrorKind::InvalidRequest => Self::InvalidRequest { operation, detail },
            BackendErrorKind::NotFound => Self::NotFound { operation, detail },
        }
    }

    /// Shorthand for a transient failure.
    #[must_use]
    pub fn transient(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transient, operation, detail)
    }

    /// Error returned by trait methods an adapter does not implement.
    #[must_use]
    pub fn unsupported(operation: &'static str) -> Self {
        Self::new(
            BackendErrorKind::InvalidRequest,
            operation,
            "operation not supported by this adapter",
        )
    }

    /// Classification of the failure.
    #[must_use]
    pub const fn kind(&self) -> BackendErrorKind {
        match self {
            Self::Transient { .. } | Self::Timeout { .. } => BackendErrorKind::Transient,
            Self::QuotaExhausted { .. } => BackendErrorKind::QuotaExhausted,
            Self::PermissionDenied { .. } => BackendErrorKind::PermissionDenied,
            Self::RecognizerConfig { .. } => BackendErrorKind::RecognizerConfig,
            Self::InvalidRequest { .. } => BackendErrorKind::InvalidRequest,
            Self::NotFound { .. } => BackendErrorKind::NotFound,
        }
    }

    /// Operation identifier recorded by the adapter.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Transient { operation, .. }
            | Self::QuotaExhausted { operation, .. }
            | Self::PermissionDenied { operation, .. }
            | Self::RecognizerConfig { operation, .. }
            | Self::InvalidRequest { operation, .. }
            | Self::NotFound { operation, .. }
            | Self::Timeout { operation, .. } => operation,
        }
    }

    /// Remote detail text, empty for timeouts.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Transient { detail, .. }
            | Self::QuotaExhausted { detail, .. }
            | Self::PermissionDenied { detail, .. }
            | Self::RecognizerConfig { detail, .. }
            | Self::InvalidRequest { detail, .. }
            | Self::NotFound { detail, .. } => detail,
            Self::Timeout { .. } => "",
        }
    }

    /// Returns `true` when retrying the same call could succeed.
    ///
    /// Quota exhaustion is excluded: it has its own backoff loop at the
    /// bulk-submission site.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), BackendErrorKind::Transient)
    }
}
