//! Fixed-delay retry for connection-scoped upload attempts.

use backon::{ConstantBuilder, Retryable};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Constant delay between attempts, no jitter. Which errors qualify for a
/// retry is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Pause between consecutive attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    fn backoff(&self) -> ConstantBuilder {
        let retries = self.max_attempts.max(1) - 1;
        ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(retries as usize)
    }
}

/// Run `attempt_fn` until it succeeds or the policy is exhausted.
///
/// The closure receives the 1-based attempt number. On success the value is
/// returned with the number of attempts it took; on exhaustion the last error
/// is returned.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, attempt_fn: F) -> Result<(T, u32), E>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_when(policy, label, |_: &E| true, attempt_fn).await
}

/// Like [`with_retry`], but an error for which `retryable` is false is
/// returned at once.
pub async fn with_retry_when<T, E, R, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    retryable: R,
    mut attempt_fn: F,
) -> Result<(T, u32), E>
where
    E: Display,
    R: FnMut(&E) -> bool,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = AtomicU32::new(0);

    let value = (|| {
        let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
        attempt_fn(attempt)
    })
    .retry(policy.backoff())
    .sleep(tokio::time::sleep)
    .when(retryable)
    .notify(|err: &E, delay: Duration| {
        warn!(
            "{} failed: {}. Retrying in {:?} (attempt {}/{})",
            label,
            err,
            delay,
            attempts.load(Ordering::Relaxed),
            policy.max_attempts.max(1)
        );
    })
    .await?;

    Ok((value, attempts.load(Ordering::Relaxed)))
}
