//! Retry-with-backoff wrapper for individual remote calls.
//!
//! # Design
//! - Delay before attempt `n + 1` is `base_delay * 2^(n - 1)`, capped at
//!   `max_delay`. No jitter.
//! - After `max_attempts` failures the last error is returned unchanged.
//! - Errors that report themselves as non-retryable fail on the first attempt.
//! - Every attempt is logged and counted in `retry_attempts_total`.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use callstream_core::{BackendError, BackendResult};
use callstream_telemetry::Metrics;
use tracing::{debug, warn};

/// Upper bound on a single backoff wait unless configured otherwise.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Classification consulted before scheduling another attempt.
pub trait Retryable {
    /// Whether a failed call may succeed if repeated.
    fn is_retryable(&self) -> bool {
        true
    }
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Attempt limit and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first; at least one.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub base_delay: Duration,
    /// Ceiling for any single wait.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy with the default 60 second ceiling.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Replace the backoff ceiling.
    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait applied after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

/// Executes fallible async operations under a [`RetryPolicy`].
#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    metrics: Metrics,
}

impl Retrier {
    /// Build a retrier that reports attempts to `metrics`.
    #[must_use]
    pub const fn new(policy: RetryPolicy, metrics: Metrics) -> Self {
        Self { policy, metrics }
    }

    /// Policy applied by this retrier.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts the policy.
    ///
    /// # Errors
    ///
    /// Returns the error from the final attempt unchanged.
    pub async fn run<T, E, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Debug,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    self.metrics.inc_retry_attempt(operation, "success");
                    if attempt > 1 {
                        debug!(operation, attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    self.metrics.inc_retry_attempt(operation, "fatal");
                    warn!(operation, attempt, error = ?err, "call failed with non-retryable error");
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    self.metrics.inc_retry_attempt(operation, "exhausted");
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        error = ?err,
                        "retry attempts exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.policy.delay_for(attempt);
                    self.metrics.inc_retry_attempt(operation, "retry");
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = ?err,
                        "call failed; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Bound a single remote call, mapping expiry to [`BackendError::Timeout`].
///
/// # Errors
///
/// Returns the call's own error, or a timeout error once `limit` elapses.
pub async fn with_timeout<T, Fut>(
    operation: &'static str,
    limit: Duration,
    call: Fut,
) -> BackendResult<T>
where
    Fut: Future<Output = BackendResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            operation,
            after: limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callstream_core::BackendErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn retrier(max_attempts: u32, base: Duration) -> anyhow::Result<(Retrier, Metrics)> {
        let metrics = Metrics::new()?;
        Ok((
            Retrier::new(RetryPolicy::new(max_attempts, base), metrics.clone()),
            metrics,
        ))
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for(7), Duration::from_secs(60));
        assert_eq!(policy.delay_for(200), Duration::from_secs(60));
        assert_eq!(policy.delay_for(0), Duration::from_secs(2));

        let tight = policy.with_max_delay(Duration::from_secs(5));
        assert_eq!(tight.delay_for(3), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_max_minus_one_failures() -> anyhow::Result<()> {
        let (retrier, metrics) = retrier(3, Duration::from_secs(1))?;
        let calls = Arc::new(AtomicU32::new(0));

        let started = Instant::now();
        let value = retrier
            .run("recognizer.transcribe", || {
                let calls = Arc::clone(&calls);
                async move {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt < 3 {
                        Err(BackendError::transient("recognizer.transcribe", "503"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await?;

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.retry_attempts("recognizer.transcribe", "retry"), 2);
        assert_eq!(metrics.retry_attempts("recognizer.transcribe", "success"), 1);
        // 1s after the first failure, 2s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_call_stops_after_max_attempts() -> anyhow::Result<()> {
        let (retrier, metrics) = retrier(4, Duration::from_millis(10))?;
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), BackendError> = retrier
            .run("store.download", || {
                let calls = Arc::clone(&calls);
                async move {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(BackendError::transient(
                        "store.download",
                        format!("attempt {attempt}"),
                    ))
                }
            })
            .await;

        let err = result.err().map(|err| err.detail().to_string());
        assert_eq!(err.as_deref(), Some("attempt 4"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(metrics.retry_attempts("store.download", "retry"), 3);
        assert_eq!(metrics.retry_attempts("store.download", "exhausted"), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn permission_errors_fail_fast() -> anyhow::Result<()> {
        let (retrier, metrics) = retrier(3, Duration::from_secs(1))?;
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), BackendError> = retrier
            .run("redaction.deidentify", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::new(
                        BackendErrorKind::PermissionDenied,
                        "redaction.deidentify",
                        "403",
                    ))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.retry_attempts("redaction.deidentify", "fatal"), 1);
        Ok(())
    }

    #[derive(Debug)]
    struct Opaque;

    impl Retryable for Opaque {}

    #[tokio::test(start_paused = true)]
    async fn default_classification_retries_everything() -> anyhow::Result<()> {
        let (retrier, _) = retrier(2, Duration::from_millis(5))?;
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), Opaque> = retrier
            .run("opaque", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Opaque)
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_maps_expiry_to_transient_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        };
        let result: BackendResult<()> =
            with_timeout("recognizer.transcribe", Duration::from_secs(1), slow).await;
        match result {
            Err(err @ BackendError::Timeout { .. }) => assert!(err.is_transient()),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
