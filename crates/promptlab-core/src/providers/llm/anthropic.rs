use super::LlmClient;
use crate::model::{ChatMessage, Completion, Role, TokenUsage};
use async_trait::async_trait;
use serde_json::json;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    pub base_url: String,
    pub api_key: String,
    pub max_tokens: u32,
    pub client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            max_tokens: 4096,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// The messages API takes the system prompt as a top-level field.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let rest = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

fn parse_usage(json: &serde_json::Value) -> Option<TokenUsage> {
    let u = json.get("usage")?;
    let input = u.get("input_tokens")?.as_u64()?;
    let output = u.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0);
    Some(TokenUsage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
    })
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
    ) -> anyhow::Result<Completion> {
        let url = format!("{}/messages", self.base_url);
        let (system, messages) = split_system(messages);

        let mut body = json!({
            "model": model_id,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });
        if let Some(s) = system {
            body["system"] = json!(s);
        }

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic messages API error ({}): {}", status, error_text);
        }

        let json: serde_json::Value = resp.json().await?;

        let text: String = json
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| anyhow::anyhow!("Anthropic API response missing content"))?
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect();

        Ok(Completion {
            text,
            usage: parse_usage(&json),
        })
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}
