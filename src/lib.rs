//! Image Generation Broker
//!
//! A Rust library that brokers image-generation requests across many
//! independent backend services through one orchestrated pipeline:
//! validation, rate limiting, result caching, retry with backoff,
//! submit-then-poll completion tracking, and prompt-driven backend
//! selection with fallback.

pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod response;

pub use backend::registry::BackendRegistry;
pub use backend::traits::{
    Capabilities, GeneratedImage, GenerationRequest, GenerationResult, ImageBackend, ImageFormat,
    ImageSource,
};
pub use config::{BrokerSettings, ConfigSource, EnvSource, StaticSource};
pub use error::{BrokerError, ErrorBody, Result};
pub use gateway::orchestrator::Orchestrator;

use std::sync::Arc;

/// Build an orchestrator over the default registry and settings.
///
/// The registry is an explicit value owned by the returned orchestrator;
/// nothing here is process-global.
pub fn broker(config: Arc<dyn ConfigSource>, settings: BrokerSettings) -> Orchestrator {
    let registry = Arc::new(BackendRegistry::new(config));
    Orchestrator::new(registry, settings)
}
