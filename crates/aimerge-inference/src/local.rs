use crate::backend::{BackendError, ModelParams, ResolutionBackend, ResolutionRequest, ResolutionResponse};
use crate::prompt::build_instruction;
use crate::reply::{parse_reply, LOCAL_FALLBACK_CONFIDENCE};
use crate::transport::{OllamaTransport, Transport};
use aimerge_core::config::LocalModelConfig;
use aimerge_core::BackendKind;
use std::sync::Arc;

/// Backend for a locally reachable model server.
pub struct LocalBackend {
    model: String,
    transport: Arc<dyn Transport>,
}

impl LocalBackend {
    pub fn new(config: &LocalModelConfig) -> anyhow::Result<Self> {
        let transport = OllamaTransport::new(&config.endpoint, &config.model)?;
        Ok(Self::with_transport(&config.model, Arc::new(transport)))
    }

    pub fn with_transport(model: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            model: model.to_string(),
            transport,
        }
    }
}

#[async_trait::async_trait]
impl ResolutionBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn resolve_with(
        &self,
        request: &ResolutionRequest,
        params: &ModelParams,
    ) -> Result<ResolutionResponse, BackendError> {
        let instruction = build_instruction(request);
        let raw = self
            .transport
            .send(&instruction, params)
            .await
            .map_err(|e| BackendError::request(BackendKind::Local, e))?;
        Ok(parse_reply(&raw, LOCAL_FALLBACK_CONFIDENCE))
    }

    /// The configured model must be installed locally. Names match by
    /// prefix so `codellama` accepts `codellama:latest`.
    async fn validate_config(&self) -> bool {
        match self.transport.list_models().await {
            Ok(models) => models.iter().any(|name| name.starts_with(&self.model)),
            Err(e) => {
                tracing::warn!(error = %e, model = %self.model, "Local model server not reachable");
                false
            }
        }
    }

    async fn list_models(&self) -> Vec<String> {
        self.transport.list_models().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to list local models");
            Vec::new()
        })
    }
}
