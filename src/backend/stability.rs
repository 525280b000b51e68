//! Stability AI Stable Image backend

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::backend::traits::{
    Capabilities, GenerationRequest, GenerationResult, ImageBackend,
};
use crate::config::ConfigSource;
use crate::error::{retryable_status, BrokerError, Result};
use crate::response;

const NAME: &str = "stability";
const DEFAULT_BASE_URL: &str = "https://api.stability.ai";
const DEFAULT_MODEL: &str = "stable-image-core";

pub struct StabilityBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct StableImageResponse {
    image: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl StabilityBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_key: config.get("STABILITY_API_KEY"),
            base_url: config
                .get("STABILITY_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BrokerError::Configuration("STABILITY_API_KEY is not set".to_string()))
    }

    fn base_form(request: &GenerationRequest) -> Form {
        let mut form = Form::new()
            .text("prompt", request.prompt.clone())
            .text("output_format", "png");
        if let Some(w) = request.width {
            form = form.text("width", w.to_string());
        }
        if let Some(h) = request.height {
            form = form.text("height", h.to_string());
        }
        if let Some(seed) = request.seed {
            form = form.text("seed", seed.to_string());
        }
        if let Some(guidance) = request.guidance {
            form = form.text("cfg_scale", guidance.to_string());
        }
        if let Some(steps) = request.steps {
            form = form.text("steps", steps.to_string());
        }
        form
    }

    async fn send(&self, url: String, form: Form, model: String) -> Result<GenerationResult> {
        let http = self
            .client
            .post(&url)
            .bearer_auth(self.key()?)
            .header("accept", "application/json")
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

        let parsed: StableImageResponse = http.json().await.map_err(|e| {
            BrokerError::backend(NAME, format!("failed to parse response: {}", e), true)
        })?;

        let mut warnings = Vec::new();
        if let Some(reason) = parsed.finish_reason.as_deref() {
            if reason != "SUCCESS" {
                warnings.push(format!("finish reason: {}", reason));
            }
        }

        Ok(GenerationResult {
            images: vec![response::inline_from_b64(&parsed.image)?],
            backend: NAME.to_string(),
            model,
            warnings,
        })
    }
}

#[async_trait]
impl ImageBackend for StabilityBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["STABILITY_API_KEY".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: true,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec![
                "stable-image-core".to_string(),
                "sd3.5-large".to_string(),
                "sd3.5-medium".to_string(),
            ],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let route = if model.starts_with("sd3") {
            "sd3"
        } else {
            "core"
        };
        let url = format!("{}/v2beta/stable-image/generate/{}", self.base_url, route);

        debug!(backend = NAME, model = %model, "Sending generate request");
        self.send(url, Self::base_form(request), model).await
    }

    async fn edit(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/v2beta/stable-image/edit/inpaint", self.base_url);

        let base = request
            .base_image
            .as_ref()
            .ok_or_else(|| BrokerError::InvalidRequest("edit requires a base image".to_string()))?
            .load()
            .await?;

        let mut form = Self::base_form(request)
            .part("image", Part::bytes(base).file_name("image.png"));
        if let Some(mask) = request.mask.as_ref() {
            form = form.part("mask", Part::bytes(mask.load().await?).file_name("mask.png"));
        }

        debug!(backend = NAME, "Sending inpaint request");
        self.send(url, form, model).await
    }
}
