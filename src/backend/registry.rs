//! Lazily-constructed registry of backend instances

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::backend::traits::{BackendStatus, ImageBackend};
use crate::backend::{bfl, fal, ideogram, leonardo, openai, recraft, replicate, stability, together};
use crate::config::ConfigSource;

/// Every backend name this registry knows how to construct
pub const KNOWN_BACKENDS: &[&str] = &[
    "openai",
    "stability",
    "replicate",
    "together",
    "fal",
    "ideogram",
    "bfl",
    "recraft",
    "leonardo",
];

/// Holds at most one instance per backend name.
///
/// Instances are constructed on first use and memoized for the process
/// lifetime; the registry is an explicit value passed into the orchestrator,
/// not module-level state.
pub struct BackendRegistry {
    config: Arc<dyn ConfigSource>,
    backends: DashMap<String, Arc<dyn ImageBackend>>,
}

impl BackendRegistry {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            backends: DashMap::new(),
        }
    }

    /// Pre-seed an instance, replacing any lazily-built one with that name.
    /// Used to inject alternative implementations and test doubles.
    pub fn register(&self, backend: Arc<dyn ImageBackend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    /// Fetch an instance by name, constructing it on first access.
    /// Unknown names yield `None`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageBackend>> {
        if let Some(existing) = self.backends.get(name) {
            return Some(existing.clone());
        }
        if !KNOWN_BACKENDS.contains(&name) {
            return None;
        }

        // The entry shard lock guarantees at-most-once construction.
        let entry = self
            .backends
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(backend = %name, "Constructing backend");
                build(name, self.config.as_ref())
            });
        Some(entry.clone())
    }

    /// All registered names plus the buildable ones, in stable order
    fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = KNOWN_BACKENDS.iter().map(|s| s.to_string()).collect();
        for entry in self.backends.iter() {
            if !names.contains(entry.key()) {
                names.push(entry.key().clone());
            }
        }
        names
    }

    /// Backends whose own configuration check passes
    pub fn list_configured(&self) -> Vec<Arc<dyn ImageBackend>> {
        self.known_names()
            .iter()
            .filter_map(|name| self.get(name))
            .filter(|backend| backend.is_configured())
            .collect()
    }

    /// Names of the configured backends
    pub fn configured_names(&self) -> Vec<String> {
        self.list_configured()
            .iter()
            .map(|backend| backend.name().to_string())
            .collect()
    }

    /// Diagnostics for every known backend, configured or not
    pub fn status(&self) -> Vec<BackendStatus> {
        self.known_names()
            .iter()
            .filter_map(|name| self.get(name))
            .map(|backend| backend.status())
            .collect()
    }
}

fn build(name: &str, config: &dyn ConfigSource) -> Arc<dyn ImageBackend> {
    match name {
        "openai" => Arc::new(openai::OpenAiBackend::new(config)),
        "stability" => Arc::new(stability::StabilityBackend::new(config)),
        "replicate" => Arc::new(replicate::ReplicateBackend::new(config)),
        "together" => Arc::new(together::TogetherBackend::new(config)),
        "fal" => Arc::new(fal::FalBackend::new(config)),
        "ideogram" => Arc::new(ideogram::IdeogramBackend::new(config)),
        "bfl" => Arc::new(bfl::BflBackend::new(config)),
        "recraft" => Arc::new(recraft::RecraftBackend::new(config)),
        "leonardo" => Arc::new(leonardo::LeonardoBackend::new(config)),
        other => unreachable!("unknown backend '{}' passed the KNOWN_BACKENDS gate", other),
    }
}
