//! Backoff policies and retry of transient external-service errors.

use std::future::Future;
use std::time::Duration;

use slidecast_types::Result;

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: base * 2^attempt, capped at max.
    Exponential { base: Duration, max: Duration },
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Compute the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::Exponential { base, max } => {
                let millis =
                    (base.as_millis() as u64).saturating_mul(2u64.saturating_pow(attempt as u32));
                Duration::from_millis(millis).min(*max)
            }
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(4),
            max: Duration::from_secs(60),
        }
    }
}

/// How many times a transient failure is attempted, and how long to wait between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: usize,
    pub backoff: BackoffPolicy,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that calls once and never waits.
    pub fn none() -> Self {
        Self::new(1, BackoffPolicy::None)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, BackoffPolicy::default())
    }
}

/// Call `f` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The last error is returned on exhaustion.
pub async fn retry_transient<T, F, Fut>(policy: &RetryPolicy, operation: &str, f: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %e,
                    "Retryable error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slidecast_types::SlidecastError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rate_limited() -> SlidecastError {
        SlidecastError::RateLimited {
            provider: "google".into(),
            retry_after_ms: 0,
        }
    }

    // 1. Success on first try makes a single call
    #[tokio::test]
    async fn success_on_first_try() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result = retry_transient(&RetryPolicy::new(3, BackoffPolicy::None), "probe", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, SlidecastError>(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // 2. A transient error is retried and the next success returned
    #[tokio::test]
    async fn transient_error_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result = retry_transient(&RetryPolicy::new(5, BackoffPolicy::None), "tts", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok("audio")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "audio");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    // 3. Exhausted attempts return the last transient error
    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result: Result<()> =
            retry_transient(&RetryPolicy::new(5, BackoffPolicy::None), "image", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(rate_limited())
                }
            })
            .await;
        assert!(matches!(result, Err(SlidecastError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    // 4. Non-retryable errors are returned immediately
    #[tokio::test]
    async fn terminal_error_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let result: Result<()> =
            retry_transient(&RetryPolicy::new(5, BackoffPolicy::None), "script", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(SlidecastError::AuthError {
                        provider: "google".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(SlidecastError::AuthError { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // 5. Exponential backoff doubles and respects the cap
    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(32));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(60));
    }

    // 6. Fixed backoff is constant and a zero-attempt policy still calls once
    #[test]
    fn fixed_backoff_and_minimum_attempts() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(250));
        assert_eq!(RetryPolicy::new(0, BackoffPolicy::None).max_attempts, 1);
        assert_eq!(RetryPolicy::default().max_attempts, 5);
    }
}
