//! End-to-end request lifecycle
//!
//! The orchestrator is the only entry point the outside world calls. Per
//! request: validate, select candidates, then for each candidate in order
//! admit -> cache lookup -> retried backend dispatch, falling back to the
//! next candidate on retryable failure until the list is exhausted.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::registry::BackendRegistry;
use crate::backend::traits::{GenerationRequest, GenerationResult, ImageBackend};
use crate::config::BrokerSettings;
use crate::error::{AttemptFailure, BrokerError, Result};
use crate::gateway::cache::{CacheKey, ResultCache};
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::retry;
use crate::gateway::selection::SelectionEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Generate,
    Edit,
}

/// Brokers generation requests across the configured backends
pub struct Orchestrator {
    registry: Arc<BackendRegistry>,
    limiter: RateLimiter,
    cache: ResultCache,
    selection: SelectionEngine,
    settings: BrokerSettings,
}

impl Orchestrator {
    pub fn new(registry: Arc<BackendRegistry>, settings: BrokerSettings) -> Self {
        Self {
            registry,
            limiter: RateLimiter::new(settings.rate_limit.clone()),
            cache: ResultCache::new(settings.cache.clone()),
            selection: SelectionEngine::new(settings.selection.clone()),
            settings,
        }
    }

    /// Generate images from a prompt
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationResult> {
        self.execute(request, Mode::Generate).await
    }

    /// Edit a base image guided by a prompt
    pub async fn edit(&self, request: GenerationRequest) -> Result<GenerationResult> {
        self.execute(request, Mode::Edit).await
    }

    /// Diagnostics passthrough: configured status of every known backend
    pub fn backend_status(&self) -> Vec<crate::backend::traits::BackendStatus> {
        self.registry.status()
    }

    async fn execute(&self, request: GenerationRequest, mode: Mode) -> Result<GenerationResult> {
        let request_id = Uuid::new_v4();
        let span = info_span!("request", id = %request_id);

        async move {
            self.validate(&request, mode)?;

            let candidates = self.resolve_candidates(&request, mode)?;
            debug!(candidates = ?candidates, "Resolved candidate backends");

            let deadline = Instant::now() + self.settings.request_timeout();
            let mut failures: Vec<AttemptFailure> = Vec::new();

            for name in candidates {
                match self.try_backend(&name, &request, mode, deadline).await {
                    Ok(result) => {
                        info!(backend = %name, images = result.images.len(), "Request succeeded");
                        return Ok(result);
                    }
                    Err(err) if err.is_retryable() && self.settings.fallback_enabled => {
                        warn!(backend = %name, error = %err, "Candidate failed, falling back");
                        failures.push(AttemptFailure {
                            backend: name,
                            reason: err.to_string(),
                        });
                    }
                    Err(err) => {
                        // Permanent failure, or fallback disabled: surface as-is.
                        return Err(err);
                    }
                }
            }

            Err(BrokerError::AllBackendsFailed { attempts: failures })
        }
        .instrument(span)
        .await
    }

    /// One candidate's slice of the pipeline: admission, cache, dispatch.
    async fn try_backend(
        &self,
        name: &str,
        request: &GenerationRequest,
        mode: Mode,
        deadline: Instant,
    ) -> Result<GenerationResult> {
        self.limiter.admit(name)?;

        let key = CacheKey::for_backend(request, name);
        if mode == Mode::Generate {
            if let Some(hit) = self.cache.get(&key) {
                return Ok(hit);
            }
        }

        let backend = self
            .registry
            .get(name)
            .ok_or_else(|| BrokerError::Configuration(format!("unknown backend '{}'", name)))?;

        let result = self.dispatch(backend, request, mode, deadline).await?;
        if mode == Mode::Generate {
            self.cache.put(key, result.clone());
        }
        Ok(result)
    }

    /// Retried backend call bounded by the remaining request budget.
    ///
    /// The timeout wrapper drops the in-flight call when the deadline
    /// elapses, which also cancels any poll loop the backend is running.
    async fn dispatch(
        &self,
        backend: Arc<dyn ImageBackend>,
        request: &GenerationRequest,
        mode: Mode,
        deadline: Instant,
    ) -> Result<GenerationResult> {
        let remaining = deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO);

        let attempt_all = retry::execute(&self.settings.retry, Some(deadline), |attempt| {
            let backend = backend.clone();
            let request = request.clone();
            async move {
                debug!(backend = %backend.name(), attempt = attempt + 1, "Dispatching");
                match mode {
                    Mode::Generate => backend.generate(&request).await,
                    Mode::Edit => backend.edit(&request).await,
                }
            }
            .boxed()
        });

        match tokio::time::timeout(remaining, attempt_all).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(format!(
                "request to '{}' exceeded the {}s budget",
                backend.name(),
                self.settings.request_timeout_secs
            ))),
        }
    }

    fn validate(&self, request: &GenerationRequest, mode: Mode) -> Result<()> {
        let limits = &self.settings.limits;

        if request.prompt.trim().is_empty() {
            return Err(BrokerError::InvalidRequest("prompt is empty".to_string()));
        }
        if request.prompt.len() > limits.max_prompt_len {
            return Err(BrokerError::InvalidRequest(format!(
                "prompt exceeds {} characters",
                limits.max_prompt_len
            )));
        }

        for (axis, value) in [("width", request.width), ("height", request.height)] {
            if let Some(v) = value {
                if v < limits.min_dimension || v > limits.max_dimension {
                    return Err(BrokerError::InvalidRequest(format!(
                        "{} {} outside [{}, {}]",
                        axis, v, limits.min_dimension, limits.max_dimension
                    )));
                }
            }
        }

        if let Some(steps) = request.steps {
            if steps == 0 || steps > limits.max_steps {
                return Err(BrokerError::InvalidRequest(format!(
                    "steps {} outside [1, {}]",
                    steps, limits.max_steps
                )));
            }
        }
        if let Some(guidance) = request.guidance {
            if !(0.0..=limits.max_guidance).contains(&guidance) {
                return Err(BrokerError::InvalidRequest(format!(
                    "guidance {} outside [0, {}]",
                    guidance, limits.max_guidance
                )));
            }
        }

        if mode == Mode::Edit && request.base_image.is_none() {
            return Err(BrokerError::InvalidRequest(
                "edit requests require a base image".to_string(),
            ));
        }

        Ok(())
    }

    /// Candidate list from the selection engine, narrowed to backends whose
    /// capability descriptor accepts this request.
    fn resolve_candidates(&self, request: &GenerationRequest, mode: Mode) -> Result<Vec<String>> {
        let configured = self.registry.configured_names();
        let ordered =
            self.selection
                .candidates(&request.prompt, request.explicit_backend(), &configured)?;

        let compatible: Vec<String> = ordered
            .into_iter()
            .filter(|name| {
                self.registry
                    .get(name)
                    .map(|backend| {
                        let caps = backend.capabilities();
                        let op_ok = match mode {
                            Mode::Generate => caps.supports_generate,
                            Mode::Edit => caps.supports_edit,
                        };
                        op_ok && caps.accepts(request)
                    })
                    .unwrap_or(false)
            })
            .collect();

        if let Some(name) = request.explicit_backend() {
            if !compatible.iter().any(|c| c == name) {
                return Err(BrokerError::NoCompatibleBackend(format!(
                    "backend '{}' does not accept this request",
                    name
                )));
            }
        }

        if compatible.is_empty() {
            return Err(BrokerError::NoCompatibleBackend(format!(
                "no configured backend accepts this {} request",
                match mode {
                    Mode::Generate => "generation",
                    Mode::Edit => "edit",
                }
            )));
        }
        Ok(compatible)
    }
}
