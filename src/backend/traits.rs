//! Common traits and types for image generation backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{BrokerError, Result};
use crate::response::base64 as b64;

/// Request to generate or edit images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The prompt to generate images from
    pub prompt: String,

    /// Target backend name, or None / "auto" for automatic selection
    pub backend: Option<String>,

    /// Image width
    pub width: Option<u32>,

    /// Image height
    pub height: Option<u32>,

    /// Model identifier
    pub model: Option<String>,

    /// Random seed for reproducibility
    pub seed: Option<u64>,

    /// Guidance scale / CFG scale
    pub guidance: Option<f32>,

    /// Number of inference steps
    pub steps: Option<u32>,

    /// Base image for edit requests
    pub base_image: Option<ImageSource>,

    /// Optional mask restricting the edited region
    pub mask: Option<ImageSource>,
}

impl GenerationRequest {
    pub fn new<P: Into<String>>(prompt: P) -> Self {
        Self {
            prompt: prompt.into(),
            backend: None,
            width: None,
            height: None,
            model: None,
            seed: None,
            guidance: None,
            steps: None,
            base_image: None,
            mask: None,
        }
    }

    /// Whether this request is an edit (has a base image) or a generation
    pub fn is_edit(&self) -> bool {
        self.base_image.is_some()
    }

    /// The backend name the caller asked for, if it was not "auto"
    pub fn explicit_backend(&self) -> Option<&str> {
        match self.backend.as_deref() {
            None | Some("auto") => None,
            Some(name) => Some(name),
        }
    }
}

/// An input image, inline or referenced by path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageSource {
    Inline { data: String, format: ImageFormat },
    Path { path: PathBuf },
}

impl ImageSource {
    /// Resolve the source to raw bytes
    pub async fn load(&self) -> Result<Vec<u8>> {
        match self {
            ImageSource::Inline { data, .. } => b64::decode(data),
            ImageSource::Path { path } => Ok(tokio::fs::read(path).await?),
        }
    }
}

/// Encoding of a generated image payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }
}

/// One generated image: base64 payload plus format tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub data: String,
    pub format: ImageFormat,
}

/// Response from a successful generation or edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// Ordered list of generated images
    pub images: Vec<GeneratedImage>,

    /// Backend that produced the result
    pub backend: String,

    /// Model used for generation
    pub model: String,

    /// Non-fatal notes surfaced to the caller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// What a backend can do, used to filter candidates per request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub supports_generate: bool,
    pub supports_edit: bool,
    pub max_width: u32,
    pub max_height: u32,
    pub supported_models: Vec<String>,
}

impl Capabilities {
    /// Whether the requested dimensions and model fit this backend
    pub fn accepts(&self, request: &GenerationRequest) -> bool {
        if let Some(w) = request.width {
            if w > self.max_width {
                return false;
            }
        }
        if let Some(h) = request.height {
            if h > self.max_height {
                return false;
            }
        }
        if let Some(model) = request.model.as_deref() {
            if !self.supported_models.iter().any(|m| m == model) {
                return false;
            }
        }
        true
    }
}

/// Diagnostics row reported by the registry
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub configured: bool,
    pub required_credentials: Vec<String>,
    pub capabilities: Capabilities,
}

/// Trait implemented by every image generation backend.
///
/// Backends are stateless from the orchestrator's point of view; the
/// orchestrator only reads capabilities and invokes the two operations.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Stable backend name
    fn name(&self) -> &str;

    /// Whether the credentials this backend needs are present
    fn is_configured(&self) -> bool;

    /// Names of the configuration keys this backend reads
    fn required_credentials(&self) -> Vec<String>;

    /// Capability descriptor
    fn capabilities(&self) -> Capabilities;

    /// Generate images from a prompt
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult>;

    /// Edit a base image guided by the prompt
    async fn edit(&self, request: &GenerationRequest) -> Result<GenerationResult> {
        let _ = request;
        Err(BrokerError::backend(
            self.name(),
            "image editing is not supported by this backend",
            false,
        ))
    }

    /// Current status row for diagnostics
    fn status(&self) -> BackendStatus {
        BackendStatus {
            name: self.name().to_string(),
            configured: self.is_configured(),
            required_credentials: self.required_credentials(),
            capabilities: self.capabilities(),
        }
    }
}
