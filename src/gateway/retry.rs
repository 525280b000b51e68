//! Backend-agnostic retry execution with exponential backoff and jitter

use futures::future::BoxFuture;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{BrokerError, Result};

/// Compute the sleep before attempt `attempt + 1`.
///
/// `delay = min(base * growth^attempt, max) + uniform jitter` where the
/// jitter is a fraction of the capped delay.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy.base_delay().as_millis() as f64;
    let capped = (base * policy.growth.powi(attempt as i32))
        .min(policy.max_delay().as_millis() as f64);
    let jitter = if policy.jitter > 0.0 && capped > 0.0 {
        rand::thread_rng().gen_range(0.0..capped * policy.jitter)
    } else {
        0.0
    };
    Duration::from_millis((capped + jitter) as u64)
}

/// Run `op` under the given retry policy.
///
/// The unit of work is opaque: a synchronous backend call and a single poll
/// iteration both fit. A non-retryable error aborts immediately; exhausting
/// the attempt budget wraps the last error in `RetriesExhausted`. Backoff
/// sleeps never run past `deadline`: the executor aborts with a timeout
/// instead, so an abandoned request does not hold its timer.
pub async fn execute<'a, T>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    mut op: impl FnMut(u32) -> BoxFuture<'a, Result<T>>,
) -> Result<T> {
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!(attempts = attempt, error = %err, "Retry budget exhausted");
                    return Err(BrokerError::RetriesExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }

                let delay = backoff_delay(policy, attempt - 1);
                if let Some(deadline) = deadline {
                    if Instant::now() + delay >= deadline {
                        return Err(BrokerError::Timeout(
                            "deadline would elapse before next retry".to_string(),
                        ));
                    }
                }

                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 10,
            max_delay_ms: 50,
            growth: 2.0,
            jitter: 0.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_single_invocation() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = execute(&policy(3), None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BrokerError::InvalidRequest("bad".into())) }.boxed()
        })
        .await;

        assert!(matches!(result, Err(BrokerError::InvalidRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_then_success() {
        let calls = AtomicU32::new(0);
        let result = execute(&policy(3), None, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BrokerError::backend("openai", "503", true))
                } else {
                    Ok(42u32)
                }
            }
            .boxed()
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = execute(&policy(3), None, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BrokerError::backend("openai", "503", true)) }.boxed()
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(BrokerError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(source.is_retryable());
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_stops_backoff() {
        let deadline = Instant::now() + Duration::from_millis(5);
        let result: Result<u32> = execute(&policy(5), Some(deadline), |_| {
            async { Err(BrokerError::backend("openai", "503", true)) }.boxed()
        })
        .await;

        assert!(matches!(result, Err(BrokerError::Timeout(_))));
    }

    #[test]
    fn test_backoff_schedule_caps() {
        let p = policy(5);
        assert_eq!(backoff_delay(&p, 0), Duration::from_millis(10));
        assert_eq!(backoff_delay(&p, 1), Duration::from_millis(20));
        assert_eq!(backoff_delay(&p, 10), Duration::from_millis(50));
    }
}
