//! Content-addressed, TTL-bound memo of prior generation results

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::traits::{GenerationRequest, GenerationResult};
use crate::config::CacheConfig;

/// Key over the request fields that determine the output.
///
/// The backend name is the candidate actually being dispatched, so distinct
/// fallback targets never alias each other's entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    prompt: String,
    backend: String,
    width: Option<u32>,
    height: Option<u32>,
    model: Option<String>,
    seed: Option<u64>,
}

impl CacheKey {
    pub fn for_backend(request: &GenerationRequest, backend: &str) -> Self {
        Self {
            prompt: request.prompt.clone(),
            backend: backend.to_string(),
            width: request.width,
            height: request.height,
            model: request.model.clone(),
            seed: request.seed,
        }
    }
}

struct CacheEntry {
    result: GenerationResult,
    created_at: Instant,
}

/// In-memory result cache with lazy TTL expiry and oldest-first eviction.
///
/// Only complete, terminal-success results are ever stored; lookups and
/// inserts are safe under concurrent in-flight requests.
pub struct ResultCache {
    config: CacheConfig,
    entries: DashMap<CacheKey, CacheEntry>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    /// Look up a fresh entry; entries past the TTL are treated as absent.
    pub fn get(&self, key: &CacheKey) -> Option<GenerationResult> {
        let ttl = self.config.ttl();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.created_at.elapsed() < ttl => {
                debug!(backend = %key.backend, "Result cache hit");
                return Some(entry.result.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Store a successful result, evicting the oldest entries past capacity.
    pub fn put(&self, key: CacheKey, result: GenerationResult) {
        self.entries.insert(
            key,
            CacheEntry {
                result,
                created_at: Instant::now(),
            },
        );

        while self.entries.len() > self.config.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.created_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    debug!(backend = %key.backend, "Evicted oldest cache entry");
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
