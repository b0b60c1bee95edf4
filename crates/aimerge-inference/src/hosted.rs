use crate::backend::{BackendError, ModelParams, ResolutionBackend, ResolutionRequest, ResolutionResponse};
use crate::prompt::build_instruction;
use crate::reply::{parse_reply, HOSTED_FALLBACK_CONFIDENCE};
use crate::transport::{AnthropicTransport, OpenAiTransport, Transport};
use aimerge_core::config::HostedModelConfig;
use aimerge_core::BackendKind;
use std::sync::Arc;

/// Backend for a hosted API. The vendor protocol is carried by the
/// transport; `transport` is `None` when no credential is configured.
pub struct HostedBackend {
    kind: BackendKind,
    model: String,
    transport: Option<Arc<dyn Transport>>,
}

impl HostedBackend {
    pub fn openai(config: &HostedModelConfig, api_key: Option<&str>) -> anyhow::Result<Self> {
        let transport = match non_empty(api_key) {
            Some(key) => Some(Arc::new(OpenAiTransport::new(&config.endpoint, &config.model, key)?)
                as Arc<dyn Transport>),
            None => None,
        };
        Ok(Self::with_transport(BackendKind::OpenAi, &config.model, transport))
    }

    pub fn anthropic(config: &HostedModelConfig, api_key: Option<&str>) -> anyhow::Result<Self> {
        let transport = match non_empty(api_key) {
            Some(key) => Some(Arc::new(AnthropicTransport::new(&config.endpoint, &config.model, key)?)
                as Arc<dyn Transport>),
            None => None,
        };
        Ok(Self::with_transport(BackendKind::Anthropic, &config.model, transport))
    }

    pub fn with_transport(kind: BackendKind, model: &str, transport: Option<Arc<dyn Transport>>) -> Self {
        Self {
            kind,
            model: model.to_string(),
            transport,
        }
    }

    pub fn has_credential(&self) -> bool {
        self.transport.is_some()
    }
}

fn non_empty(key: Option<&str>) -> Option<&str> {
    key.map(str::trim).filter(|k| !k.is_empty())
}

#[async_trait::async_trait]
impl ResolutionBackend for HostedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn resolve_with(
        &self,
        request: &ResolutionRequest,
        params: &ModelParams,
    ) -> Result<ResolutionResponse, BackendError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(BackendError::MissingCredential(self.kind))?;
        let instruction = build_instruction(request);
        let raw = transport
            .send(&instruction, params)
            .await
            .map_err(|e| BackendError::request(self.kind, e))?;
        Ok(parse_reply(&raw, HOSTED_FALLBACK_CONFIDENCE))
    }

    async fn validate_config(&self) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        match transport.probe().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(backend = %self.kind, error = %e, "Backend probe failed");
                false
            }
        }
    }

    async fn list_models(&self) -> Vec<String> {
        let Some(transport) = &self.transport else {
            return Vec::new();
        };
        transport.list_models().await.unwrap_or_else(|e| {
            tracing::warn!(backend = %self.kind, error = %e, "Failed to list models");
            Vec::new()
        })
    }
}
