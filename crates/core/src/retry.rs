//! Exponential-backoff retry for request/response calls.
//!
//! [`with_retry`] runs an async operation up to `max_retries + 1` times,
//! retrying only when the failure is classified as transient by the
//! [`RetryConfig`]. The delay before attempt `n + 1` is
//! `min(initial * factor^(n-1), max_delay)` plus up to 50% random jitter.
//!
//! Sleeps between attempts observe a [`CancellationToken`]; the token is
//! also checked before every attempt. Results are reported as a
//! [`RetryOutcome`] rather than a bare `Result` so callers always learn
//! how many attempts were spent.
//!
//! The push event stream does not use this module; it has its own
//! linear reconnect policy.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio_util::sync::CancellationToken;

/// HTTP status codes treated as transient by default.
pub const DEFAULT_RETRYABLE_STATUS: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Error-text markers of transient network failures (matched
/// case-insensitively against the error's `Display` output).
pub const DEFAULT_TRANSIENT_MARKERS: [&str; 5] = [
    "timed out",
    "timeout",
    "connection",
    "error sending request",
    "network",
];

/// Upper bound of the random jitter, as a fraction of the base delay.
const MAX_JITTER_FRACTION: f64 = 0.5;

/// Tunable parameters for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = `max_retries + 1`).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the pre-jitter delay.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub factor: f64,
    /// Status codes that make a failure retryable.
    pub retryable_status: Vec<u16>,
    /// Error-text markers that make a status-less failure retryable.
    pub transient_markers: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            retryable_status: DEFAULT_RETRYABLE_STATUS.to_vec(),
            transient_markers: DEFAULT_TRANSIENT_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Pre-jitter delay that follows failed attempt number `attempt`
    /// (1-based), clamped to [`max_delay`](Self::max_delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let ms = self.initial_delay.as_millis() as f64 * self.factor.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        Duration::from_millis(ms.min(max_ms) as u64)
    }

    /// Whether `err` should be retried under this configuration.
    ///
    /// A status code, when present, decides on its own; otherwise the
    /// error text is matched against the transient markers.
    pub fn should_retry<E: Retryable>(&self, err: &E) -> bool {
        if let Some(status) = err.status_code() {
            return self.retryable_status.contains(&status);
        }
        let message = err.to_string().to_lowercase();
        self.transient_markers
            .iter()
            .any(|marker| message.contains(&marker.to_lowercase()))
    }
}

/// Errors that can be classified for retry.
pub trait Retryable: fmt::Display {
    /// HTTP status carried by the error, if any.
    fn status_code(&self) -> Option<u16> {
        None
    }
}

/// Terminal failure of a retried operation.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The last attempt failed, or the failure was not retryable.
    #[error("{0}")]
    Operation(E),

    /// The cancellation token fired before an attempt or during a sleep.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Result of [`with_retry`]: the final result plus the attempts spent.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, RetryError<E>>,
    /// Number of times the operation was actually invoked.
    pub attempts: u32,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.result
    }
}

/// Add up to [`MAX_JITTER_FRACTION`] of random jitter to `delay`.
fn jittered(delay: Duration) -> Duration {
    let fraction: f64 = rand::rng().random_range(0.0..=MAX_JITTER_FRACTION);
    delay + delay.mul_f64(fraction)
}

/// Run `op` with retry and backoff.
///
/// `op` receives the 1-based attempt number. Non-retryable failures are
/// returned immediately; retryable ones are retried until
/// `max_retries + 1` attempts have been made.
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return RetryOutcome {
                result: Err(RetryError::Cancelled),
                attempts: attempt,
            };
        }

        attempt += 1;
        let err = match op(attempt).await {
            Ok(data) => {
                return RetryOutcome {
                    result: Ok(data),
                    attempts: attempt,
                }
            }
            Err(e) => e,
        };

        if attempt >= max_attempts || !config.should_retry(&err) {
            if attempt > 1 {
                tracing::warn!(attempts = attempt, error = %err, "Giving up after retries");
            }
            return RetryOutcome {
                result: Err(RetryError::Operation(err)),
                attempts: attempt,
            };
        }

        let delay = jittered(config.delay_for_attempt(attempt));
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Request failed, retrying",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(attempt, "Retry sleep cancelled");
                return RetryOutcome {
                    result: Err(RetryError::Cancelled),
                    attempts: attempt,
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Run [`with_retry`] for every item, at most `concurrency` at a time.
///
/// `on_item` is called with the item index as each item finishes (in
/// completion order); the returned vector is in input order.
pub async fn with_retry_all<I, T, E, F, Fut, C>(
    items: &[I],
    concurrency: usize,
    config: &RetryConfig,
    cancel: &CancellationToken,
    op: F,
    mut on_item: C,
) -> Vec<RetryOutcome<T, E>>
where
    F: Fn(&I, u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
    C: FnMut(usize, &RetryOutcome<T, E>),
{
    let op = &op;
    let mut slots: Vec<Option<RetryOutcome<T, E>>> = items.iter().map(|_| None).collect();

    let mut running = stream::iter(items.iter().enumerate())
        .map(|(index, item)| async move {
            let outcome = with_retry(config, cancel, |attempt| op(item, attempt)).await;
            (index, outcome)
        })
        .buffer_unordered(concurrency.max(1));

    while let Some((index, outcome)) = running.next().await {
        on_item(index, &outcome);
        slots[index] = Some(outcome);
    }

    slots.into_iter().flatten().collect()
}
