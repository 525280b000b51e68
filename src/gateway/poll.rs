//! Generic submit-then-poll completion tracking
//!
//! Several backends answer a generation request with a job handle instead of
//! a result. This module drives any such protocol through one state machine:
//! Submitted -> Pending -> {Ready | Failed}, with an exponential backoff
//! between status checks.

use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BrokerError, Result};

/// Outcome of one status check against the backend
#[derive(Debug)]
pub enum PollStatus<T> {
    /// Job accepted but not finished
    Pending,
    /// Terminal success carrying the extracted result
    Ready(T),
    /// Terminal failure reported by the backend
    Failed { message: String, retryable: bool },
}

/// Polling schedule, tunable per backend.
///
/// Queue-style services settle in well under a second while batch renderers
/// need multi-second intervals, so every backend supplies its own schedule.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub growth: f64,
    pub max_attempts: u32,
    pub max_wall_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            growth: 1.5,
            max_attempts: 60,
            max_wall_secs: 120,
        }
    }
}

impl PollConfig {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64;
        let capped = (base * self.growth.powi(attempt as i32)).min(self.max_delay_ms as f64);
        // Small spread so concurrent jobs do not check in lockstep.
        let jitter = if capped > 0.0 {
            rand::thread_rng().gen_range(0.0..capped * 0.1)
        } else {
            0.0
        };
        Duration::from_millis((capped + jitter) as u64)
    }
}

/// Drives one submitted job to a terminal state
pub struct CompletionTracker {
    backend: String,
    config: PollConfig,
}

impl CompletionTracker {
    pub fn new(backend: &str, config: PollConfig) -> Self {
        Self {
            backend: backend.to_string(),
            config,
        }
    }

    /// Repeatedly invoke `check` until the job reaches a terminal state.
    ///
    /// Exceeding the attempt budget or the wall-clock ceiling surfaces a
    /// retryable timeout. A `Failed` status surfaces a backend error with
    /// whatever classification the backend signalled. The returned future
    /// is safe to drop mid-sleep; cancellation releases the pending timer.
    pub async fn wait<'a, T>(
        &self,
        job: &str,
        mut check: impl FnMut(u32) -> BoxFuture<'a, Result<PollStatus<T>>>,
    ) -> Result<T> {
        let started = Instant::now();
        let max_wall = Duration::from_secs(self.config.max_wall_secs);

        for attempt in 0..self.config.max_attempts {
            match check(attempt).await? {
                PollStatus::Ready(value) => {
                    debug!(
                        backend = %self.backend,
                        job = %job,
                        attempts = attempt + 1,
                        "Job completed"
                    );
                    return Ok(value);
                }
                PollStatus::Failed { message, retryable } => {
                    warn!(backend = %self.backend, job = %job, error = %message, "Job failed");
                    return Err(BrokerError::backend(&self.backend, message, retryable));
                }
                PollStatus::Pending => {
                    let delay = self.config.delay(attempt);
                    if started.elapsed() + delay >= max_wall {
                        return Err(BrokerError::Timeout(format!(
                            "job {} on '{}' did not complete within {}s",
                            job, self.backend, self.config.max_wall_secs
                        )));
                    }
                    debug!(
                        backend = %self.backend,
                        job = %job,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Job pending"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(BrokerError::Timeout(format!(
            "job {} on '{}' exceeded {} status checks",
            job, self.backend, self.config.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_attempts: u32) -> PollConfig {
        PollConfig {
            initial_delay_ms: 10,
            max_delay_ms: 40,
            growth: 2.0,
            max_attempts,
            max_wall_secs: 3_600,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_then_ready() {
        let tracker = CompletionTracker::new("replicate", config(10));
        let checks = AtomicU32::new(0);

        let result = tracker
            .wait("job-1", |_| {
                let n = checks.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Ok(PollStatus::Pending)
                    } else {
                        Ok(PollStatus::Ready("output".to_string()))
                    }
                }
                .boxed()
            })
            .await;

        assert_eq!(result.unwrap(), "output");
        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_stops_polling() {
        let tracker = CompletionTracker::new("replicate", config(10));
        let checks = AtomicU32::new(0);

        let result: Result<String> = tracker
            .wait("job-2", |_| {
                let n = checks.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Ok(PollStatus::Pending)
                    } else {
                        Ok(PollStatus::Failed {
                            message: "NSFW content detected".to_string(),
                            retryable: false,
                        })
                    }
                }
                .boxed()
            })
            .await;

        assert_eq!(checks.load(Ordering::SeqCst), 2);
        match result {
            Err(BrokerError::Backend { retryable, .. }) => assert!(!retryable),
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_budget_times_out() {
        let tracker = CompletionTracker::new("replicate", config(4));

        let result: Result<String> = tracker
            .wait("job-3", |_| async { Ok(PollStatus::Pending) }.boxed())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, BrokerError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_clock_ceiling() {
        let tracker = CompletionTracker::new(
            "leonardo",
            PollConfig {
                initial_delay_ms: 500,
                max_delay_ms: 500,
                growth: 1.0,
                max_attempts: 1_000,
                max_wall_secs: 2,
            },
        );
        let checks = AtomicU32::new(0);

        let result: Result<String> = tracker
            .wait("job-4", |_| {
                checks.fetch_add(1, Ordering::SeqCst);
                async { Ok(PollStatus::Pending) }.boxed()
            })
            .await;

        assert!(matches!(result, Err(BrokerError::Timeout(_))));
        // 500ms-ish steps against a 2s ceiling: far fewer than the attempt budget
        assert!(checks.load(Ordering::SeqCst) < 10);
    }
}
