//! Ideogram backend, strongest at rendering legible text

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::backend::traits::{
    Capabilities, GenerationRequest, GenerationResult, ImageBackend,
};
use crate::config::ConfigSource;
use crate::error::{retryable_status, BrokerError, Result};
use crate::response;

const NAME: &str = "ideogram";
const DEFAULT_BASE_URL: &str = "https://api.ideogram.ai";
const DEFAULT_MODEL: &str = "V_2";

pub struct IdeogramBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    data: Vec<GeneratedEntry>,
}

#[derive(Debug, Deserialize)]
struct GeneratedEntry {
    url: String,
    #[serde(default)]
    is_image_safe: Option<bool>,
}

impl IdeogramBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_key: config.get("IDEOGRAM_API_KEY"),
            base_url: config
                .get("IDEOGRAM_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BrokerError::Configuration("IDEOGRAM_API_KEY is not set".to_string()))
    }

    async fn collect(&self, parsed: GenerateResponse, model: String) -> Result<GenerationResult> {
        let mut images = Vec::new();
        let mut warnings = Vec::new();
        for entry in parsed.data {
            if entry.is_image_safe == Some(false) {
                warnings.push("an image was flagged by the safety filter".to_string());
                continue;
            }
            images.push(response::download_image(&self.client, NAME, &entry.url).await?);
        }
        if images.is_empty() {
            return Err(BrokerError::backend(NAME, "response contained no images", true));
        }
        Ok(GenerationResult {
            images,
            backend: NAME.to_string(),
            model,
            warnings,
        })
    }
}

#[async_trait]
impl ImageBackend for IdeogramBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["IDEOGRAM_API_KEY".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: true,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec!["V_2".to_string(), "V_2_TURBO".to_string()],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.key()?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/generate", self.base_url);

        let mut image_request = json!({
            "prompt": request.prompt,
            "model": model,
        });
        if let (Some(w), Some(h)) = (request.width, request.height) {
            image_request["resolution"] = json!(format!("RESOLUTION_{}_{}", w, h));
        }
        if let Some(seed) = request.seed {
            image_request["seed"] = json!(seed);
        }

        debug!(backend = NAME, model = %model, "Sending generate request");
        let http = self
            .client
            .post(&url)
            .header("Api-Key", key)
            .json(&json!({ "image_request": image_request }))
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

        let parsed: GenerateResponse = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse response: {}", e), true)
        })?;
        self.collect(parsed, model).await
    }

    async fn edit(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.key()?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/edit", self.base_url);

        let base = request
            .base_image
            .as_ref()
            .ok_or_else(|| BrokerError::InvalidRequest("edit requires a base image".to_string()))?
            .load()
            .await?;

        let mut form = Form::new()
            .text("prompt", request.prompt.clone())
            .text("model", model.clone())
            .part("image_file", Part::bytes(base).file_name("image.png"));
        if let Some(mask) = request.mask.as_ref() {
            form = form.part(
                "mask",
                Part::bytes(mask.load().await?).file_name("mask.png"),
            );
        }

        debug!(backend = NAME, "Sending edit request");
        let http = self
            .client
            .post(&url)
            .header("Api-Key", key)
            .multipart(form)
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

        let parsed: GenerateResponse = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse response: {}", e), true)
        })?;
        self.collect(parsed, model).await
    }
}
