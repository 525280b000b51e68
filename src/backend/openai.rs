//! OpenAI Images API backend

use async_trait::async_trait;
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

const NAME: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-image-1";

pub struct OpenAiBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    data: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    revised_prompt: Option<String>,
}

impl OpenAiBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_key: config.get("OPENAI_API_KEY"),
            base_url: config
                .get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BrokerError::Configuration("OPENAI_API_KEY is not set".to_string()))
    }

    fn size(request: &GenerationRequest) -> String {
        format!(
            "{}x{}",
            request.width.unwrap_or(1024),
            request.height.unwrap_or(1024)
        )
    }

    async fn collect(&self, parsed: ImagesResponse, model: String) -> Result<GenerationResult> {
        let mut images = Vec::new();
        let mut warnings = Vec::new();

        for entry in parsed.data {
            if let Some(revised) = entry.revised_prompt {
                warnings.push(format!("prompt revised by backend: {}", revised));
            }
            if let Some(b64) = entry.b64_json {
                images.push(response::inline_from_b64(&b64)?);
            } else if let Some(url) = entry.url {
                images.push(response::download_image(&self.client, NAME, &url).await?);
            }
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
impl ImageBackend for OpenAiBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["OPENAI_API_KEY".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: true,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec![
                "gpt-image-1".to_string(),
                "dall-e-3".to_string(),
                "dall-e-2".to_string(),
            ],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.key()?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/v1/images/generations", self.base_url);

        debug!(backend = NAME, model = %model, "Sending generate request");

        let body = json!({
            "model": model,
            "prompt": request.prompt,
            "n": 1,
            "size": Self::size(request),
            "response_format": "b64_json",
        });

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

        let parsed: ImagesResponse = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse response: {}", e), true)
        })?;
        self.collect(parsed, model).await
    }

    async fn edit(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self.key()?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/v1/images/edits", self.base_url);

        let base = request
            .base_image
            .as_ref()
            .ok_or_else(|| BrokerError::InvalidRequest("edit requires a base image".to_string()))?
            .load()
            .await?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", model.clone())
            .text("prompt", request.prompt.clone())
            .text("size", Self::size(request))
            .text("response_format", "b64_json")
            .part(
                "image",
                reqwest::multipart::Part::bytes(base).file_name("image.png"),
            );

        if let Some(mask) = request.mask.as_ref() {
            form = form.part(
                "mask",
                reqwest::multipart::Part::bytes(mask.load().await?).file_name("mask.png"),
            );
        }

        let http = self
            .client
            .post(&url)
            .bearer_auth(key)
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

        let parsed: ImagesResponse = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse response: {}", e), true)
        })?;
        self.collect(parsed, model).await
    }
}
