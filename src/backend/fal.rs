//! fal.ai queue backend (submit-then-poll)

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

const NAME: &str = "fal";
const DEFAULT_BASE_URL: &str = "https://queue.fal.run";
const DEFAULT_MODEL: &str = "fal-ai/flux/schnell";

pub struct FalBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    poll: PollConfig,
}

#[derive(Debug, Deserialize)]
struct QueueSubmit {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct QueueResult {
    #[serde(default)]
    images: Vec<QueueImage>,
}

#[derive(Debug, Deserialize)]
struct QueueImage {
    url: String,
}

impl FalBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_key: config.get("FAL_KEY"),
            base_url: config
                .get("FAL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            // Queue jobs usually settle in a couple of seconds.
            poll: PollConfig {
                initial_delay_ms: 400,
                max_delay_ms: 3_000,
                growth: 1.6,
                max_attempts: 80,
                max_wall_secs: 180,
            },
        }
    }

    fn auth(&self) -> Result<String> {
        self.api_key
            .as_deref()
            .map(|key| format!("Key {}", key))
            .ok_or_else(|| BrokerError::Configuration("FAL_KEY is not set".to_string()))
    }

    async fn check_status(&self, model: &str, id: &str) -> Result<PollStatus<()>> {
        let url = format!("{}/{}/requests/{}/status", self.base_url, model, id);
        let http = self
            .client
            .get(&url)
            .header("Authorization", self.auth()?)
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

        let parsed: QueueStatus = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse status: {}", e), true)
        })?;
        Ok(match parsed.status.as_str() {
            "COMPLETED" => PollStatus::Ready(()),
            "FAILED" => PollStatus::Failed {
                message: "queued request failed".to_string(),
                retryable: false,
            },
            _ => PollStatus::Pending,
        })
    }
}

#[async_trait]
impl ImageBackend for FalBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["FAL_KEY".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: false,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec![
                "fal-ai/flux/schnell".to_string(),
                "fal-ai/flux/dev".to_string(),
            ],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let submit_url = format!("{}/{}", self.base_url, model);

        let mut body = json!({ "prompt": request.prompt });
        if let (Some(w), Some(h)) = (request.width, request.height) {
            body["image_size"] = json!({ "width": w, "height": h });
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        if let Some(steps) = request.steps {
            body["num_inference_steps"] = json!(steps);
        }

        debug!(backend = NAME, model = %model, "Submitting to queue");
        let http = self
            .client
            .post(&submit_url)
            .header("Authorization", self.auth()?)
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
        let submitted: QueueSubmit = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse submission: {}", e), true)
        })?;

        let tracker = CompletionTracker::new(NAME, self.poll.clone());
        let id = submitted.request_id.clone();
        let model_path = model.clone();
        tracker
            .wait(&submitted.request_id, |_| {
                let id = id.clone();
                let model_path = model_path.clone();
                async move { self.check_status(&model_path, &id).await }.boxed()
            })
            .await?;

        let result_url = format!(
            "{}/{}/requests/{}",
            self.base_url, model, submitted.request_id
        );
        let http = self
            .client
            .get(&result_url)
            .header("Authorization", self.auth()?)
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
        let parsed: QueueResult = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse result: {}", e), true)
        })?;

        if parsed.images.is_empty() {
            return Err(BrokerError::backend(NAME, "queue result contained no images", true));
        }
        let mut images = Vec::with_capacity(parsed.images.len());
        for image in &parsed.images {
            images.push(response::download_image(&self.client, NAME, &image.url).await?);
        }

        Ok(GenerationResult {
            images,
            backend: NAME.to_string(),
            model,
            warnings: vec![],
        })
    }
}
