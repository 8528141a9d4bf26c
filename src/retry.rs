//! Retry with configurable backoff.
//!
//! Wraps a fallible unit of work and re-runs it while the error class is
//! retryable. The cooperative runner is the primary shape; the blocking
//! runner mirrors its semantics with `std::thread::sleep` for call sites
//! without a reactor. Both check cancellation before every attempt and
//! before every sleep, and neither waits after the final attempt.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Constant delay.
    Fixed,
    /// Delay grows as `base * attempt`.
    Linear,
    /// Delay grows as `base * 2^(attempt - 1)`.
    Exponential,
}

impl BackoffStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "linear" => Some(Self::Linear),
            "exponential" => Some(Self::Exponential),
            _ => None,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt. Zero means a single
    /// attempt and no retry.
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    /// Upper bound applied to every computed delay.
    pub max_delay: Duration,
    /// Optional timeout applied to each individual attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    /// Delay taken after the failed attempt numbered `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(31);
                self.base_delay.saturating_mul(1u32 << shift)
            }
        };
        delay.min(self.max_delay)
    }

    /// Total number of attempts this policy allows.
    pub fn attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Error classification used by the retry runners.
///
/// Implementors decide which of their variants are transient; the runners
/// additionally need constructors for the two failure modes they introduce
/// themselves (cancellation and per-attempt timeout).
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
    fn cancelled() -> Self;
    fn attempt_timeout() -> Self;
}

/// Run `op` under `policy`, cooperatively.
///
/// Returns the first success or the error of the last attempt. A
/// non-retryable error aborts immediately. Cancellation is observed before
/// each attempt and interrupts backoff sleeps.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if cancel.is_cancelled() {
            return Err(E::cancelled());
        }

        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).await {
                Ok(result) => result,
                Err(_) => Err(E::attempt_timeout()),
            },
            None => op().await,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= attempts {
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(E::cancelled()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

/// Blocking twin of [`run_with_retry`].
///
/// Per-attempt timeouts cannot be imposed on an opaque blocking call, so
/// `attempt_timeout` is expected to be enforced by the operation's own
/// transport; everything else matches the cooperative runner. Sleeps are
/// sliced so cancellation is observed promptly.
pub fn run_with_retry_blocking<T, E, F>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Result<T, E>,
{
    const SLICE: Duration = Duration::from_millis(50);

    let attempts = policy.attempts();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if cancel.is_cancelled() {
            return Err(E::cancelled());
        }

        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= attempts {
                    return Err(err);
                }

                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );

                let mut remaining = delay;
                while !remaining.is_zero() {
                    if cancel.is_cancelled() {
                        return Err(E::cancelled());
                    }
                    let slice = remaining.min(SLICE);
                    std::thread::sleep(slice);
                    remaining -= slice;
                }
            }
        }
    }
}
