//! Leonardo AI backend (submit-then-poll)

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

const NAME: &str = "leonardo";
const DEFAULT_BASE_URL: &str = "https://cloud.leonardo.ai";

pub struct LeonardoBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    poll: PollConfig,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "sdGenerationJob")]
    job: SubmitJob,
}

#[derive(Debug, Deserialize)]
struct SubmitJob {
    #[serde(rename = "generationId")]
    generation_id: String,
}

#[derive(Debug, Deserialize)]
struct GenerationLookup {
    #[serde(rename = "generations_by_pk")]
    generation: Option<GenerationRecord>,
}

#[derive(Debug, Deserialize)]
struct GenerationRecord {
    status: String,
    #[serde(default)]
    generated_images: Vec<GeneratedEntry>,
}

#[derive(Debug, Deserialize)]
struct GeneratedEntry {
    url: String,
}

impl LeonardoBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_key: config.get("LEONARDO_API_KEY"),
            base_url: config
                .get("LEONARDO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            // Batch renderer; polling faster than this just burns requests.
            poll: PollConfig {
                initial_delay_ms: 2_000,
                max_delay_ms: 10_000,
                growth: 1.3,
                max_attempts: 45,
                max_wall_secs: 300,
            },
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BrokerError::Configuration("LEONARDO_API_KEY is not set".to_string()))
    }

    async fn check_generation(&self, id: &str) -> Result<PollStatus<Vec<String>>> {
        let url = format!("{}/api/rest/v1/generations/{}", self.base_url, id);
        let http = self
            .client
            .get(&url)
            .bearer_auth(self.key()?)
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

        let parsed: GenerationLookup = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse generation: {}", e), true)
        })?;
        let record = match parsed.generation {
            Some(record) => record,
            None => {
                return Ok(PollStatus::Failed {
                    message: "generation disappeared from the API".to_string(),
                    retryable: true,
                })
            }
        };

        Ok(match record.status.as_str() {
            "COMPLETE" => PollStatus::Ready(
                record
                    .generated_images
                    .into_iter()
                    .map(|entry| entry.url)
                    .collect(),
            ),
            "FAILED" => PollStatus::Failed {
                message: "generation failed".to_string(),
                retryable: false,
            },
            _ => PollStatus::Pending,
        })
    }
}

#[async_trait]
impl ImageBackend for LeonardoBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["LEONARDO_API_KEY".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: false,
            max_width: 1536,
            max_height: 1536,
            supported_models: vec![],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.key()?;
        let url = format!("{}/api/rest/v1/generations", self.base_url);

        let mut body = json!({
            "prompt": request.prompt,
            "num_images": 1,
            "width": request.width.unwrap_or(1024),
            "height": request.height.unwrap_or(1024),
        });
        if let Some(model) = request.model.as_deref() {
            body["modelId"] = json!(model);
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        if let Some(guidance) = request.guidance {
            body["guidance_scale"] = json!(guidance);
        }

        debug!(backend = NAME, "Submitting generation");
        let http = self
            .client
            .post(&url)
            .bearer_auth(key)
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
        let id = submitted.job.generation_id.clone();
        let urls = tracker
            .wait(&submitted.job.generation_id, |_| {
                let id = id.clone();
                async move { self.check_generation(&id).await }.boxed()
            })
            .await?;

        if urls.is_empty() {
            return Err(BrokerError::backend(NAME, "generation produced no images", true));
        }
        let mut images = Vec::with_capacity(urls.len());
        for url in &urls {
            images.push(response::download_image(&self.client, NAME, url).await?);
        }

        Ok(GenerationResult {
            images,
            backend: NAME.to_string(),
            model: request
                .model
                .clone()
                .unwrap_or_else(|| "leonardo-default".to_string()),
            warnings: vec![],
        })
    }
}
