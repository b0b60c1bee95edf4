use crate::backend::{BackendError, ResolutionBackend};
use crate::hosted::HostedBackend;
use crate::local::LocalBackend;
use aimerge_core::{BackendKind, SecretPrompt, SecretStore, Settings};
use std::sync::Arc;

/// Builds the backend for a kind from settings and an optional credential.
pub trait BackendFactory: Send + Sync {
    fn build(
        &self,
        kind: BackendKind,
        settings: &Settings,
        credential: Option<&str>,
    ) -> anyhow::Result<Box<dyn ResolutionBackend>>;
}

/// Builds the real HTTP-backed variants.
pub struct HttpBackendFactory;

impl BackendFactory for HttpBackendFactory {
    fn build(
        &self,
        kind: BackendKind,
        settings: &Settings,
        credential: Option<&str>,
    ) -> anyhow::Result<Box<dyn ResolutionBackend>> {
        Ok(match kind {
            BackendKind::Local => Box::new(LocalBackend::new(&settings.local)?),
            BackendKind::OpenAi => Box::new(HostedBackend::openai(&settings.openai, credential)?),
            BackendKind::Anthropic => {
                Box::new(HostedBackend::anthropic(&settings.anthropic, credential)?)
            }
        })
    }
}

/// Result of selecting a backend. An invalid configuration does not
/// prevent the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchOutcome {
    pub kind: BackendKind,
    pub valid: bool,
}

/// Owns the active resolution backend and the configuration it was
/// built from.
pub struct BackendSelector {
    settings: Settings,
    secrets: Arc<dyn SecretStore>,
    prompt: Arc<dyn SecretPrompt>,
    factory: Arc<dyn BackendFactory>,
    active: Option<Box<dyn ResolutionBackend>>,
}

impl BackendSelector {
    pub fn new(settings: Settings, secrets: Arc<dyn SecretStore>, prompt: Arc<dyn SecretPrompt>) -> Self {
        Self::with_factory(settings, secrets, prompt, Arc::new(HttpBackendFactory))
    }

    pub fn with_factory(
        settings: Settings,
        secrets: Arc<dyn SecretStore>,
        prompt: Arc<dyn SecretPrompt>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        Self {
            settings,
            secrets,
            prompt,
            factory,
            active: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn active_kind(&self) -> Option<BackendKind> {
        self.active.as_ref().map(|b| b.kind())
    }

    /// The active backend, borrowed for the duration of a call.
    pub fn current(&self) -> Result<&dyn ResolutionBackend, BackendError> {
        self.active.as_deref().ok_or(BackendError::NotConfigured)
    }

    /// Build and activate the backend for `kind`, then validate it.
    ///
    /// Hosted kinds look up their credential in the secret store and ask
    /// the prompt on first use, persisting whatever it returns.
    pub async fn switch_to(&mut self, kind: BackendKind) -> anyhow::Result<SwitchOutcome> {
        let credential = self.resolve_credential(kind)?;
        let backend = self.factory.build(kind, &self.settings, credential.as_deref())?;

        self.active = Some(backend);
        self.settings.backend = kind;

        let valid = match &self.active {
            Some(backend) => backend.validate_config().await,
            None => false,
        };
        if valid {
            tracing::info!(backend = %kind, model = %self.settings.model_for(kind), "Switched resolution backend");
        } else {
            tracing::warn!(
                backend = %kind,
                model = %self.settings.model_for(kind),
                "Switched resolution backend, but its configuration did not validate"
            );
        }

        Ok(SwitchOutcome { kind, valid })
    }

    /// Replace the configuration and rebuild the backend it selects.
    pub async fn reload(&mut self, settings: Settings) -> anyhow::Result<SwitchOutcome> {
        let kind = settings.backend;
        self.settings = settings;
        self.switch_to(kind).await
    }

    /// Store a new credential. Rebuilds the backend only when `kind` is active.
    pub async fn update_credential(
        &mut self,
        kind: BackendKind,
        value: &str,
    ) -> anyhow::Result<Option<SwitchOutcome>> {
        let key = kind
            .secret_key()
            .ok_or_else(|| anyhow::anyhow!("the {} backend does not use a credential", kind))?;
        self.secrets.set_secret(key, value.trim())?;
        self.refresh_if_active(kind).await
    }

    /// Forget a credential. Rebuilds the backend only when `kind` is active.
    pub async fn clear_credential(&mut self, kind: BackendKind) -> anyhow::Result<Option<SwitchOutcome>> {
        let key = kind
            .secret_key()
            .ok_or_else(|| anyhow::anyhow!("the {} backend does not use a credential", kind))?;
        self.secrets.delete_secret(key)?;
        self.refresh_if_active(kind).await
    }

    async fn refresh_if_active(&mut self, kind: BackendKind) -> anyhow::Result<Option<SwitchOutcome>> {
        if self.active_kind() == Some(kind) {
            Ok(Some(self.switch_to(kind).await?))
        } else {
            Ok(None)
        }
    }

    fn resolve_credential(&self, kind: BackendKind) -> anyhow::Result<Option<String>> {
        let Some(key) = kind.secret_key() else {
            return Ok(None);
        };
        if let Some(secret) = self.secrets.get_secret(key)?.filter(|s| !s.trim().is_empty()) {
            return Ok(Some(secret));
        }

        match self.prompt.prompt_for_secret(kind) {
            Some(secret) if !secret.trim().is_empty() => {
                let secret = secret.trim().to_string();
                self.secrets.set_secret(key, &secret)?;
                tracing::info!(backend = %kind, "Stored API key");
                Ok(Some(secret))
            }
            _ => {
                tracing::warn!(backend = %kind, "No API key provided");
                Ok(None)
            }
        }
    }
}
