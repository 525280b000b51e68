//! Replicate predictions backend (submit-then-poll)

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

const NAME: &str = "replicate";
const DEFAULT_BASE_URL: &str = "https://api.replicate.com";
const DEFAULT_MODEL: &str = "black-forest-labs/flux-schnell";

pub struct ReplicateBackend {
    client: Client,
    api_token: Option<String>,
    base_url: String,
    poll: PollConfig,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl ReplicateBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_token: config.get("REPLICATE_API_TOKEN"),
            base_url: config
                .get("REPLICATE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            poll: PollConfig {
                initial_delay_ms: 1_000,
                max_delay_ms: 8_000,
                growth: 1.5,
                max_attempts: 60,
                max_wall_secs: 300,
            },
        }
    }

    fn token(&self) -> Result<&str> {
        self.api_token.as_deref().ok_or_else(|| {
            BrokerError::Configuration("REPLICATE_API_TOKEN is not set".to_string())
        })
    }

    async fn fetch_prediction(&self, id: &str) -> Result<Prediction> {
        let url = format!("{}/v1/predictions/{}", self.base_url, id);
        let http = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token()?))
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
        http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse prediction: {}", e), true)
        })
    }

    /// Map one prediction snapshot onto the tracker's state machine
    fn poll_status(prediction: Prediction) -> PollStatus<Vec<String>> {
        match prediction.status.as_str() {
            "succeeded" => {
                let urls = match prediction.output {
                    Some(serde_json::Value::String(url)) => vec![url],
                    Some(serde_json::Value::Array(items)) => items
                        .into_iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect(),
                    _ => vec![],
                };
                PollStatus::Ready(urls)
            }
            "failed" => PollStatus::Failed {
                message: prediction
                    .error
                    .unwrap_or_else(|| "prediction failed".to_string()),
                retryable: false,
            },
            "canceled" => PollStatus::Failed {
                message: "prediction was canceled".to_string(),
                retryable: true,
            },
            _ => PollStatus::Pending,
        }
    }
}

#[async_trait]
impl ImageBackend for ReplicateBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["REPLICATE_API_TOKEN".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: false,
            max_width: 4096,
            max_height: 4096,
            supported_models: vec![
                "black-forest-labs/flux-schnell".to_string(),
                "black-forest-labs/flux-dev".to_string(),
                "stability-ai/sdxl".to_string(),
            ],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let token = self.token()?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/v1/models/{}/predictions", self.base_url, model);

        let mut input = json!({ "prompt": request.prompt });
        if let Some(w) = request.width {
            input["width"] = json!(w);
        }
        if let Some(h) = request.height {
            input["height"] = json!(h);
        }
        if let Some(seed) = request.seed {
            input["seed"] = json!(seed);
        }
        if let Some(guidance) = request.guidance {
            input["guidance_scale"] = json!(guidance);
        }
        if let Some(steps) = request.steps {
            input["num_inference_steps"] = json!(steps);
        }

        debug!(backend = NAME, model = %model, "Submitting prediction");
        let http = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", token))
            .json(&json!({ "input": input }))
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
        let submitted: Prediction = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse prediction: {}", e), true)
        })?;

        let tracker = CompletionTracker::new(NAME, self.poll.clone());
        let id = submitted.id.clone();
        let urls = tracker
            .wait(&submitted.id, |_| {
                let id = id.clone();
                async move { Ok(Self::poll_status(self.fetch_prediction(&id).await?)) }.boxed()
            })
            .await?;

        if urls.is_empty() {
            return Err(BrokerError::backend(NAME, "prediction produced no output", true));
        }

        let mut images = Vec::with_capacity(urls.len());
        for url in &urls {
            images.push(response::download_image(&self.client, NAME, url).await?);
        }
        Ok(GenerationResult {
            images,
            backend: NAME.to_string(),
            model,
            warnings: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(status: &str, output: Option<serde_json::Value>) -> Prediction {
        Prediction {
            id: "p1".to_string(),
            status: status.to_string(),
            output,
            error: None,
        }
    }

    #[test]
    fn test_poll_status_mapping() {
        assert!(matches!(
            ReplicateBackend::poll_status(prediction("starting", None)),
            PollStatus::Pending
        ));
        assert!(matches!(
            ReplicateBackend::poll_status(prediction("processing", None)),
            PollStatus::Pending
        ));
        match ReplicateBackend::poll_status(prediction(
            "succeeded",
            Some(json!(["https://cdn/img.png"])),
        )) {
            PollStatus::Ready(urls) => assert_eq!(urls, vec!["https://cdn/img.png".to_string()]),
            other => panic!("expected ready, got {:?}", other),
        }
        assert!(matches!(
            ReplicateBackend::poll_status(prediction("failed", None)),
            PollStatus::Failed { retryable: false, .. }
        ));
    }
}
