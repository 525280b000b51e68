//! Black Forest Labs FLUX backend (submit-then-poll)

use async_trait::async_trait;
use futures::FutureExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::backend::traits::{
    Capabilities, GenerationRequest, GenerationResult, ImageBackend,
};
use crate::config::ConfigSource;
use crate::error::{retryable_status, BrokerError, Result};
use crate::gateway::poll::{CompletionTracker, PollConfig, PollStatus};
use crate::response;

const NAME: &str = "bfl";
const DEFAULT_BASE_URL: &str = "https://api.bfl.ml";
const DEFAULT_MODEL: &str = "flux-pro-1.1";

pub struct BflBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    poll: PollConfig,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    status: String,
    #[serde(default)]
    result: Option<ResultPayload>,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    sample: String,
}

impl BflBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_key: config.get("BFL_API_KEY"),
            base_url: config
                .get("BFL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            poll: PollConfig {
                initial_delay_ms: 1_500,
                max_delay_ms: 6_000,
                growth: 1.4,
                max_attempts: 60,
                max_wall_secs: 240,
            },
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BrokerError::Configuration("BFL_API_KEY is not set".to_string()))
    }

    async fn check_result(&self, id: &str) -> Result<PollStatus<String>> {
        let url = format!("{}/v1/get_result?id={}", self.base_url, id);
        let http = self
            .client
            .get(&url)
            .header("x-key", self.key()?)
            .send()
            .await?;

        let status = http.status();
        if !status.is_success() {
            let text = http.text().await.unwrap_or_default();
            return Err(BrokerError::backend(
                NAME,
                format!("{}: {}", status, text),
                retryable_status(status),
            ));
        }

        let parsed: ResultResponse = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse result: {}", e), true)
        })?;
        Ok(match parsed.status.as_str() {
            "Ready" => match parsed.result {
                Some(payload) => PollStatus::Ready(payload.sample),
                None => PollStatus::Failed {
                    message: "ready result missing its sample".to_string(),
                    retryable: true,
                },
            },
            "Error" | "Failed" => PollStatus::Failed {
                message: format!("generation ended in state {}", parsed.status),
                retryable: false,
            },
            "Content Moderated" | "Request Moderated" => PollStatus::Failed {
                message: "request was moderated".to_string(),
                retryable: false,
            },
            _ => PollStatus::Pending,
        })
    }
}

#[async_trait]
impl ImageBackend for BflBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["BFL_API_KEY".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: false,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec![
                "flux-pro-1.1".to_string(),
                "flux-pro".to_string(),
                "flux-dev".to_string(),
            ],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.key()?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/v1/{}", self.base_url, model);

        let mut body = json!({
            "prompt": request.prompt,
            "width": request.width.unwrap_or(1024),
            "height": request.height.unwrap_or(1024),
        });
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        if let Some(guidance) = request.guidance {
            body["guidance"] = json!(guidance);
        }
        if let Some(steps) = request.steps {
            body["steps"] = json!(steps);
        }

        debug!(backend = NAME, model = %model, "Submitting generation");
        let http = self
            .client
            .post(&url)
            .header("x-key", key)
            .json(&body)
            .send()
            .await?;

        let status = http.status();
        if !status.is_success() {
            let text = http.text().await.unwrap_or_default();
            return Err(BrokerError::backend(
                NAME,
                format!("{}: {}", status, text),
                retryable_status(status),
            ));
        }
        let submitted: SubmitResponse = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse submission: {}", e), true)
        })?;

        let tracker = CompletionTracker::new(NAME, self.poll.clone());
        let id = submitted.id.clone();
        let sample_url = tracker
            .wait(&submitted.id, |_| {
                let id = id.clone();
                async move { self.check_result(&id).await }.boxed()
            })
            .await?;

        let image = response::download_image(&self.client, NAME, &sample_url).await?;
        Ok(GenerationResult {
            images: vec![image],
            backend: NAME.to_string(),
            model,
            warnings: vec![],
        })
    }
}
