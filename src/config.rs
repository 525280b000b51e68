//! Broker settings, policy tables, and the credential source trait

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Source of credential and endpoint configuration.
///
/// Backends discover their API keys and base-URL overrides through this
/// trait; the orchestration core itself never reads configuration.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed key/value source, mainly for tests and embedding
#[derive(Default)]
pub struct StaticSource {
    values: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }
}

impl ConfigSource for StaticSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Root settings for the broker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerSettings {
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub limits: RequestLimits,
    #[serde(default)]
    pub selection: SelectionPolicy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryPolicy::default(),
            limits: RequestLimits::default(),
            selection: SelectionPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
            fallback_enabled: true,
        }
    }
}

impl BrokerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Per-backend sliding-window admission control
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> usize {
    10
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Result cache bounds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_capacity() -> usize {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            capacity: default_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Backoff schedule for retried backend calls
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_growth")]
    pub growth: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_growth() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            growth: default_growth(),
            jitter: default_jitter(),
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Validation bounds applied before any backend is involved
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestLimits {
    #[serde(default = "default_max_prompt_len")]
    pub max_prompt_len: usize,
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_guidance")]
    pub max_guidance: f32,
}

fn default_max_prompt_len() -> usize {
    4_000
}

fn default_min_dimension() -> u32 {
    64
}

fn default_max_dimension() -> u32 {
    4_096
}

fn default_max_steps() -> u32 {
    150
}

fn default_max_guidance() -> f32 {
    30.0
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_prompt_len: default_max_prompt_len(),
            min_dimension: default_min_dimension(),
            max_dimension: default_max_dimension(),
            max_steps: default_max_steps(),
            max_guidance: default_max_guidance(),
        }
    }
}

/// Chain orderings used by automatic selection when no category matches.
///
/// Historical deployments disagreed on the static ordering, so it is a
/// policy value rather than a constant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectionPolicy {
    #[serde(default = "default_priority_chain")]
    pub priority_chain: Vec<String>,
    #[serde(default = "default_quality_chain")]
    pub quality_chain: Vec<String>,
    #[serde(default = "default_speed_chain")]
    pub speed_chain: Vec<String>,
}

fn default_priority_chain() -> Vec<String> {
    ["openai", "bfl", "stability", "ideogram", "recraft", "leonardo", "together", "fal", "replicate"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_quality_chain() -> Vec<String> {
    ["bfl", "openai", "stability", "leonardo"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_speed_chain() -> Vec<String> {
    ["together", "fal", "stability"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            priority_chain: default_priority_chain(),
            quality_chain: default_quality_chain(),
            speed_chain: default_speed_chain(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BrokerSettings::default();
        assert_eq!(settings.rate_limit.max_requests, 10);
        assert_eq!(settings.rate_limit.window_secs, 60);
        assert_eq!(settings.cache.capacity, 100);
        assert_eq!(settings.retry.max_attempts, 3);
        assert!(settings.fallback_enabled);
    }

    #[test]
    fn test_static_source() {
        let source = StaticSource::new().with("OPENAI_API_KEY", "sk-test");
        assert_eq!(source.get("OPENAI_API_KEY").as_deref(), Some("sk-test"));
        assert!(source.get("MISSING").is_none());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: BrokerSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.request_timeout_secs, 120);
        assert_eq!(settings.limits.max_prompt_len, 4_000);
        assert_eq!(settings.selection.priority_chain[0], "openai");
    }
}
