use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Which resolution backend is active.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    OpenAi,
    Anthropic,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [BackendKind::Local, BackendKind::OpenAi, BackendKind::Anthropic];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::OpenAi => "openai",
            BackendKind::Anthropic => "anthropic",
        }
    }

    /// Secret-store key holding this backend's API credential.
    pub fn secret_key(&self) -> Option<&'static str> {
        match self {
            BackendKind::Local => None,
            BackendKind::OpenAi => Some("aimerge.openai.apiKey"),
            BackendKind::Anthropic => Some("aimerge.anthropic.apiKey"),
        }
    }

    pub fn needs_credential(&self) -> bool {
        self.secret_key().is_some()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" => Ok(BackendKind::Local),
            "openai" => Ok(BackendKind::OpenAi),
            "anthropic" | "claude" => Ok(BackendKind::Anthropic),
            other => anyhow::bail!("unknown backend '{}' (expected local, openai or anthropic)", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub local: LocalModelConfig,
    #[serde(default = "default_openai")]
    pub openai: HostedModelConfig,
    #[serde(default = "default_anthropic")]
    pub anthropic: HostedModelConfig,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            local: LocalModelConfig::default(),
            openai: default_openai(),
            anthropic: default_anthropic(),
            auto_apply: false,
            context_lines: default_context_lines(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelConfig {
    #[serde(default = "default_local_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_local_model")]
    pub model: String,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_local_endpoint(),
            model: default_local_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedModelConfig {
    pub endpoint: String,
    pub model: String,
}

fn default_local_endpoint() -> String {
    "http://localhost:11434".into()
}
fn default_local_model() -> String {
    "codellama".into()
}
fn default_openai() -> HostedModelConfig {
    HostedModelConfig {
        endpoint: "https://api.openai.com".into(),
        model: "gpt-4o".into(),
    }
}
fn default_anthropic() -> HostedModelConfig {
    HostedModelConfig {
        endpoint: "https://api.anthropic.com".into(),
        model: "claude-3-5-sonnet-20241022".into(),
    }
}
fn default_context_lines() -> usize {
    50
}
fn default_max_tokens() -> u32 {
    4096
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Model name configured for `kind`.
    pub fn model_for(&self, kind: BackendKind) -> &str {
        match kind {
            BackendKind::Local => &self.local.model,
            BackendKind::OpenAi => &self.openai.model,
            BackendKind::Anthropic => &self.anthropic.model,
        }
    }

    pub fn set_model(&mut self, kind: BackendKind, model: String) {
        match kind {
            BackendKind::Local => self.local.model = model,
            BackendKind::OpenAi => self.openai.model = model,
            BackendKind::Anthropic => self.anthropic.model = model,
        }
    }

    pub fn endpoint_for(&self, kind: BackendKind) -> &str {
        match kind {
            BackendKind::Local => &self.local.endpoint,
            BackendKind::OpenAi => &self.openai.endpoint,
            BackendKind::Anthropic => &self.anthropic.endpoint,
        }
    }
}
