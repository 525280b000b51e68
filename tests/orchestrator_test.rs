//! End-to-end tests for the orchestrated request pipeline

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use img_broker::backend::registry::BackendRegistry;
use img_broker::backend::traits::{
    Capabilities, GeneratedImage, GenerationRequest, GenerationResult, ImageBackend, ImageFormat,
};
use img_broker::config::{BrokerSettings, StaticSource};
use img_broker::error::{BrokerError, Result};
use img_broker::gateway::orchestrator::Orchestrator;

/// What a scripted backend does on each call
#[derive(Clone)]
enum Step {
    Succeed,
    FailRetryable,
    FailPermanent,
}

struct ScriptedBackend {
    name: String,
    steps: Vec<Step>,
    supports_edit: bool,
    calls: AtomicU32,
}

impl ScriptedBackend {
    fn new(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            steps,
            supports_edit: false,
            calls: AtomicU32::new(0),
        })
    }

    fn editable(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            steps,
            supports_edit: true,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn run(&self) -> Result<GenerationResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let step = self
            .steps
            .get(n)
            .or_else(|| self.steps.last())
            .cloned()
            .unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(GenerationResult {
                images: vec![GeneratedImage {
                    data: "aW1hZ2U=".to_string(),
                    format: ImageFormat::Png,
                }],
                backend: self.name.clone(),
                model: "scripted".to_string(),
                warnings: vec![],
            }),
            Step::FailRetryable => Err(BrokerError::backend(&self.name, "503 upstream", true)),
            Step::FailPermanent => Err(BrokerError::backend(&self.name, "bad input", false)),
        }
    }
}

#[async_trait]
impl ImageBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn required_credentials(&self) -> Vec<String> {
        vec![]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: self.supports_edit,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec!["scripted".to_string()],
        }
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GenerationResult> {
        self.run()
    }

    async fn edit(&self, _request: &GenerationRequest) -> Result<GenerationResult> {
        self.run()
    }
}

fn settings_for(chain: &[&str]) -> BrokerSettings {
    let mut settings = BrokerSettings::default();
    settings.selection.priority_chain = chain.iter().map(|s| s.to_string()).collect();
    settings
}

fn orchestrator(
    backends: &[Arc<ScriptedBackend>],
    settings: BrokerSettings,
) -> Orchestrator {
    let registry = Arc::new(BackendRegistry::new(Arc::new(StaticSource::new())));
    for backend in backends {
        registry.register(backend.clone());
    }
    Orchestrator::new(registry, settings)
}

// Neutral prompt that matches no category or heuristic, so candidates come
// from the configured priority chain.
const PLAIN_PROMPT: &str = "qvx bnm wrt";

#[tokio::test(start_paused = true)]
async fn cache_returns_identical_result_without_second_dispatch() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::Succeed]);
    let broker = orchestrator(&[alpha.clone()], settings_for(&["alpha"]));

    let request = GenerationRequest::new(PLAIN_PROMPT);
    let first = broker.generate(request.clone()).await.unwrap();
    let second = broker.generate(request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(alpha.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_tries_next_candidate_once() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::FailRetryable]);
    let bravo = ScriptedBackend::new("bravo", vec![Step::Succeed]);
    let mut settings = settings_for(&["alpha", "bravo"]);
    settings.retry.max_attempts = 1;
    let broker = orchestrator(&[alpha.clone(), bravo.clone()], settings);

    let result = broker
        .generate(GenerationRequest::new(PLAIN_PROMPT))
        .await
        .unwrap();

    assert_eq!(result.backend, "bravo");
    assert_eq!(alpha.calls(), 1);
    assert_eq!(bravo.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_disabled_fails_after_head_candidate() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::FailRetryable]);
    let bravo = ScriptedBackend::new("bravo", vec![Step::Succeed]);
    let mut settings = settings_for(&["alpha", "bravo"]);
    settings.retry.max_attempts = 2;
    settings.fallback_enabled = false;
    let broker = orchestrator(&[alpha.clone(), bravo.clone()], settings);

    let err = broker
        .generate(GenerationRequest::new(PLAIN_PROMPT))
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::RetriesExhausted { .. }));
    assert_eq!(alpha.calls(), 2);
    assert_eq!(bravo.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_skips_fallback() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::FailPermanent]);
    let bravo = ScriptedBackend::new("bravo", vec![Step::Succeed]);
    let broker = orchestrator(&[alpha.clone(), bravo.clone()], settings_for(&["alpha", "bravo"]));

    let err = broker
        .generate(GenerationRequest::new(PLAIN_PROMPT))
        .await
        .unwrap_err();

    assert!(matches!(err, BrokerError::Backend { retryable: false, .. }));
    assert_eq!(alpha.calls(), 1);
    assert_eq!(bravo.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_candidates_aggregate_every_failure() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::FailRetryable]);
    let bravo = ScriptedBackend::new("bravo", vec![Step::FailRetryable]);
    let mut settings = settings_for(&["alpha", "bravo"]);
    settings.retry.max_attempts = 1;
    let broker = orchestrator(&[alpha.clone(), bravo.clone()], settings);

    let err = broker
        .generate(GenerationRequest::new(PLAIN_PROMPT))
        .await
        .unwrap_err();

    match err {
        BrokerError::AllBackendsFailed { attempts } => {
            let names: Vec<_> = attempts.iter().map(|a| a.backend.as_str()).collect();
            assert_eq!(names, vec!["alpha", "bravo"]);
        }
        other => panic!("expected aggregated error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn validation_rejects_before_any_dispatch() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::Succeed]);
    let broker = orchestrator(&[alpha.clone()], settings_for(&["alpha"]));

    let empty = broker.generate(GenerationRequest::new("   ")).await;
    assert!(matches!(empty, Err(BrokerError::InvalidRequest(_))));

    let mut oversized = GenerationRequest::new(PLAIN_PROMPT);
    oversized.width = Some(10_000);
    let oversized = broker.generate(oversized).await;
    assert!(matches!(oversized, Err(BrokerError::InvalidRequest(_))));

    assert_eq!(alpha.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_backend_falls_back() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::Succeed]);
    let bravo = ScriptedBackend::new("bravo", vec![Step::Succeed]);
    let mut settings = settings_for(&["alpha", "bravo"]);
    settings.rate_limit.max_requests = 1;
    let broker = orchestrator(&[alpha.clone(), bravo.clone()], settings);

    let first = broker
        .generate(GenerationRequest::new("qvx one"))
        .await
        .unwrap();
    assert_eq!(first.backend, "alpha");

    // alpha's window is full; the second request must come from bravo.
    let second = broker
        .generate(GenerationRequest::new("qvx two"))
        .await
        .unwrap();
    assert_eq!(second.backend, "bravo");
    assert_eq!(alpha.calls(), 1);
    assert_eq!(bravo.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn dimension_filter_yields_no_compatible_backend() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::Succeed]);
    let broker = orchestrator(&[alpha.clone()], settings_for(&["alpha"]));

    let mut request = GenerationRequest::new(PLAIN_PROMPT);
    request.width = Some(4_096); // within validation bounds, beyond alpha's 2048
    let err = broker.generate(request).await.unwrap_err();

    assert!(matches!(err, BrokerError::NoCompatibleBackend(_)));
    assert_eq!(alpha.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn explicit_unconfigured_backend_is_a_configuration_error() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::Succeed]);
    let broker = orchestrator(&[alpha], settings_for(&["alpha"]));

    let mut request = GenerationRequest::new(PLAIN_PROMPT);
    request.backend = Some("missing".to_string());
    let err = broker.generate(request).await.unwrap_err();

    assert!(matches!(err, BrokerError::Configuration(_)));
}

#[tokio::test(start_paused = true)]
async fn edit_requires_capability_and_base_image() {
    let alpha = ScriptedBackend::new("alpha", vec![Step::Succeed]);
    let bravo = ScriptedBackend::editable("bravo", vec![Step::Succeed]);
    let broker = orchestrator(&[alpha.clone(), bravo.clone()], settings_for(&["alpha", "bravo"]));

    let mut request = GenerationRequest::new(PLAIN_PROMPT);
    let missing = broker.edit(request.clone()).await;
    assert!(matches!(missing, Err(BrokerError::InvalidRequest(_))));

    request.base_image = Some(img_broker::ImageSource::Inline {
        data: "aW1hZ2U=".to_string(),
        format: ImageFormat::Png,
    });
    let result = broker.edit(request.clone()).await.unwrap();

    // alpha cannot edit, so the edit-capable candidate wins.
    assert_eq!(result.backend, "bravo");
    assert_eq!(alpha.calls(), 0);

    // edit results are not memoized; a second call dispatches again.
    broker.edit(request).await.unwrap();
    assert_eq!(bravo.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn retry_within_one_backend_then_success() {
    let alpha = ScriptedBackend::new(
        "alpha",
        vec![Step::FailRetryable, Step::FailRetryable, Step::Succeed],
    );
    let broker = orchestrator(&[alpha.clone()], settings_for(&["alpha"]));

    let result = broker
        .generate(GenerationRequest::new(PLAIN_PROMPT))
        .await
        .unwrap();

    assert_eq!(result.backend, "alpha");
    assert_eq!(alpha.calls(), 3);
}
