use aimerge_core::BackendKind;
use serde::{Deserialize, Serialize};

/// Everything a backend needs to resolve one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRequest {
    pub current_content: String,
    pub incoming_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_content: Option<String>,
    pub context: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResponse {
    pub resolution: String,
    pub explanation: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<String>>,
}

/// Sampling parameters passed through to the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            max_tokens: 4096,
        }
    }
}

impl ModelParams {
    pub fn with_temperature(self, temperature: f32) -> Self {
        Self {
            temperature,
            ..self
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("no resolution backend is configured; select one first")]
    NotConfigured,

    #[error("no API key configured for the {0} backend")]
    MissingCredential(BackendKind),

    #[error("{backend} request failed: {source}")]
    Request {
        backend: BackendKind,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BackendError {
    pub fn request(backend: BackendKind, err: anyhow::Error) -> Self {
        BackendError::Request {
            backend,
            source: err.into(),
        }
    }
}

/// A service that can turn a [`ResolutionRequest`] into a resolution.
///
/// `resolve_with` fails only when the backend is unreachable or
/// misconfigured; replies in an unexpected shape degrade to a
/// low-confidence response instead. `validate_config` and `list_models`
/// never fail.
#[async_trait::async_trait]
pub trait ResolutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn model(&self) -> &str;

    async fn resolve_with(
        &self,
        request: &ResolutionRequest,
        params: &ModelParams,
    ) -> Result<ResolutionResponse, BackendError>;

    async fn resolve(&self, request: &ResolutionRequest) -> Result<ResolutionResponse, BackendError> {
        self.resolve_with(request, &ModelParams::default()).await
    }

    async fn validate_config(&self) -> bool;

    async fn list_models(&self) -> Vec<String>;
}
