//! Per-backend sliding-window admission control

use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::error::{BrokerError, Result};

/// Sliding-window rate limiter keyed by backend name.
///
/// Each backend owns an independent window; admission to one backend never
/// affects another. Expired timestamps are pruned lazily on each admission
/// check. The per-key shard lock makes concurrent admissions to the same
/// backend FIFO with respect to arrival at the lock.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    /// Record one admission for `backend`, or reject with backpressure.
    pub fn admit(&self, backend: &str) -> Result<()> {
        let now = Instant::now();
        let window = self.config.window();

        let mut timestamps = self.windows.entry(backend.to_string()).or_default();

        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.config.max_requests {
            warn!(
                backend = %backend,
                in_window = timestamps.len(),
                "Admission rejected by rate limiter"
            );
            return Err(BrokerError::RateLimitExceeded {
                backend: backend.to_string(),
            });
        }

        timestamps.push_back(now);
        debug!(backend = %backend, in_window = timestamps.len(), "Request admitted");
        Ok(())
    }

    /// Number of admissions currently inside the window, without pruning
    pub fn in_window(&self, backend: &str) -> usize {
        self.windows.get(backend).map(|w| w.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(max_requests: usize, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window_secs,
            max_requests,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_boundary() {
        let limiter = limiter(10, 60);

        for _ in 0..10 {
            assert!(limiter.admit("stability").is_ok());
        }
        assert!(matches!(
            limiter.admit("stability"),
            Err(BrokerError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides() {
        let limiter = limiter(10, 60);

        for _ in 0..10 {
            assert!(limiter.admit("stability").is_ok());
        }
        assert!(limiter.admit("stability").is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.admit("stability").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backends_are_independent() {
        let limiter = limiter(1, 60);

        assert!(limiter.admit("openai").is_ok());
        assert!(limiter.admit("openai").is_err());
        assert!(limiter.admit("together").is_ok());
    }
}
