//! Wire transports for the resolution backends.
//!
//! A transport only moves an instruction to a model and brings the raw
//! reply text back. Request shaping for each vendor lives here; reply
//! interpretation lives in the backends.

use crate::backend::ModelParams;
use crate::prompt::SYSTEM_PROMPT;
use std::time::Duration;

const GENERATE_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send one instruction and return the model's raw reply text.
    async fn send(&self, instruction: &str, params: &ModelParams) -> anyhow::Result<String>;

    /// Cheap reachability/credential check.
    async fn probe(&self) -> anyhow::Result<()>;

    async fn list_models(&self) -> anyhow::Result<Vec<String>>;
}

fn build_client() -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(GENERATE_TIMEOUT).build()?)
}

async fn check_status(response: reqwest::Response, what: &str) -> anyhow::Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("{} returned {}: {}", what, status, body.trim());
}

/// Local model server speaking the Ollama HTTP API.
pub struct OllamaTransport {
    endpoint: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaTransport {
    pub fn new(endpoint: &str, model: &str) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            http_client: build_client()?,
        })
    }
}

#[async_trait::async_trait]
impl Transport for OllamaTransport {
    async fn send(&self, instruction: &str, params: &ModelParams) -> anyhow::Result<String> {
        let request_body = serde_json::json!({
            "model": self.model,
            "system": SYSTEM_PROMPT,
            "prompt": instruction,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            }
        });

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&request_body)
            .send()
            .await?;
        let body: serde_json::Value = check_status(response, "Ollama").await?.json().await?;

        body["response"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Ollama reply has no 'response' field"))
    }

    async fn probe(&self) -> anyhow::Result<()> {
        self.list_models().await.map(|_| ())
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let response = self
            .http_client
            .get(format!("{}/api/tags", self.endpoint))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let body: serde_json::Value = check_status(response, "Ollama").await?.json().await?;

        Ok(body["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// OpenAI chat completions API.
pub struct OpenAiTransport {
    endpoint: String,
    model: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl OpenAiTransport {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            http_client: build_client()?,
        })
    }

    async fn get_models(&self) -> anyhow::Result<serde_json::Value> {
        let response = self
            .http_client
            .get(format!("{}/v1/models", self.endpoint))
            .bearer_auth(&self.api_key)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        Ok(check_status(response, "OpenAI").await?.json().await?)
    }
}

#[async_trait::async_trait]
impl Transport for OpenAiTransport {
    async fn send(&self, instruction: &str, params: &ModelParams) -> anyhow::Result<String> {
        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": instruction },
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "response_format": { "type": "json_object" },
        });

        let response = self
            .http_client
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;
        let body: serde_json::Value = check_status(response, "OpenAI").await?.json().await?;

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("OpenAI reply has no message content"))
    }

    async fn probe(&self) -> anyhow::Result<()> {
        self.get_models().await.map(|_| ())
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let body = self.get_models().await?;
        let mut models: Vec<String> = body["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .filter_map(|m| m["id"].as_str())
                    .filter(|id| id.starts_with("gpt") || id.starts_with('o'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        models.sort();
        Ok(models)
    }
}

/// Anthropic messages API.
pub struct AnthropicTransport {
    endpoint: String,
    model: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl AnthropicTransport {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            http_client: build_client()?,
        })
    }

    async fn messages(
        &self,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> anyhow::Result<serde_json::Value> {
        let response = self
            .http_client
            .post(format!("{}/v1/messages", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Ok(check_status(response, "Anthropic").await?.json().await?)
    }
}

#[async_trait::async_trait]
impl Transport for AnthropicTransport {
    async fn send(&self, instruction: &str, params: &ModelParams) -> anyhow::Result<String> {
        let request_body = serde_json::json!({
            "model": self.model,
            "system": SYSTEM_PROMPT,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": [{ "role": "user", "content": instruction }],
        });
        let body = self.messages(&request_body, GENERATE_TIMEOUT).await?;

        body["content"]
            .as_array()
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b["type"] == "text")
                    .and_then(|b| b["text"].as_str())
            })
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Anthropic reply has no text block"))
    }

    async fn probe(&self) -> anyhow::Result<()> {
        let request_body = serde_json::json!({
            "model": self.model,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "ping" }],
        });
        self.messages(&request_body, PROBE_TIMEOUT).await.map(|_| ())
    }

    async fn list_models(&self) -> anyhow::Result<Vec<String>> {
        let response = self
            .http_client
            .get(format!("{}/v1/models", self.endpoint))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        let body: serde_json::Value = check_status(response, "Anthropic").await?.json().await?;

        Ok(body["data"]
            .as_array()
            .map(|data| {
                data.iter()
                    .filter_map(|m| m["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}
