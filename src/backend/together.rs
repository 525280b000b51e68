//! Together AI image generation backend

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

const NAME: &str = "together";
const DEFAULT_BASE_URL: &str = "https://api.together.xyz";
const DEFAULT_MODEL: &str = "black-forest-labs/FLUX.1-schnell";

pub struct TogetherBackend {
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
}

impl TogetherBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_key: config.get("TOGETHER_API_KEY"),
            base_url: config
                .get("TOGETHER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl ImageBackend for TogetherBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["TOGETHER_API_KEY".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: false,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec![
                "black-forest-labs/FLUX.1-schnell".to_string(),
                "black-forest-labs/FLUX.1-dev".to_string(),
            ],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BrokerError::Configuration("TOGETHER_API_KEY is not set".to_string()))?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/v1/images/generations", self.base_url);

        let mut body = json!({
            "model": model,
            "prompt": request.prompt,
            "n": 1,
            "response_format": "b64_json",
        });
        if let Some(w) = request.width {
            body["width"] = json!(w);
        }
        if let Some(h) = request.height {
            body["height"] = json!(h);
        }
        if let Some(seed) = request.seed {
            body["seed"] = json!(seed);
        }
        if let Some(steps) = request.steps {
            body["steps"] = json!(steps);
        }

        debug!(backend = NAME, model = %model, "Sending generate request");
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

        let mut images = Vec::new();
        for entry in parsed.data {
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
            warnings: vec![],
        })
    }
}
