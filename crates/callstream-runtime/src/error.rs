//! # Design
//!
//! - Run-level failures of the ingestion monitor. Unit-level failures never
//!   reach this type; they are captured as data by the scheduler.
//! - Each variant names the resource the caller should check.

use callstream_core::BackendError;
use thiserror::Error;

/// Result alias for orchestration operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that abort a bulk ingestion.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The backend refused access to the resource.
    #[error("backend permission denied")]
    PermissionDenied {
        /// Operation identifier.
        operation: &'static str,
        /// Resource whose permissions should be checked.
        resource: String,
        /// Underlying backend error.
        source: BackendError,
    },
    /// The backend rejected the recognizer path or its configuration.
    #[error("recognizer configuration rejected")]
    RecognizerConfig {
        /// Operation identifier.
        operation: &'static str,
        /// Recognizer path that was expected to exist.
        recognizer: String,
        /// Underlying backend error.
        source: BackendError,
    },
    /// Submission kept hitting the quota after every backoff.
    #[error("backend quota still exhausted after retries")]
    QuotaExhausted {
        /// Operation identifier.
        operation: &'static str,
        /// Submission attempts made.
        attempts: u32,
        /// Last quota error.
        source: BackendError,
    },
}

impl RuntimeError {
    /// Operation identifier attached to the failure.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::PermissionDenied { operation, .. }
            | Self::RecognizerConfig { operation, .. }
            | Self::QuotaExhausted { operation, .. } => operation,
        }
    }
}
