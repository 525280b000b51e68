//! Recraft backend, design and vector-style generation

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

const NAME: &str = "recraft";
const DEFAULT_BASE_URL: &str = "https://external.api.recraft.ai";
const DEFAULT_MODEL: &str = "recraftv3";

pub struct RecraftBackend {
    client: Client,
    api_token: Option<String>,
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

impl RecraftBackend {
    pub fn new(config: &dyn ConfigSource) -> Self {
        Self {
            client: Client::new(),
            api_token: config.get("RECRAFT_API_TOKEN"),
            base_url: config
                .get("RECRAFT_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl ImageBackend for RecraftBackend {
    fn name(&self) -> &str {
        NAME
    }

    fn is_configured(&self) -> bool {
        self.api_token.is_some()
    }

    fn required_credentials(&self) -> Vec<String> {
        vec!["RECRAFT_API_TOKEN".to_string()]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_generate: true,
            supports_edit: false,
            max_width: 2048,
            max_height: 2048,
            supported_models: vec!["recraftv3".to_string(), "recraft20b".to_string()],
        }
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let token = self.api_token.as_deref().ok_or_else(|| {
            BrokerError::Configuration("RECRAFT_API_TOKEN is not set".to_string())
        })?;
        let model = request.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let url = format!("{}/v1/images/generations", self.base_url);

        let body = json!({
            "model": model,
            "prompt": request.prompt,
            "n": 1,
            "size": format!(
                "{}x{}",
                request.width.unwrap_or(1024),
                request.height.unwrap_or(1024)
            ),
            "response_format": "b64_json",
        });

        debug!(backend = NAME, model = %model, "Sending generate request");
        let http = self
            .client
            .post(&url)
            .bearer_auth(token)
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
