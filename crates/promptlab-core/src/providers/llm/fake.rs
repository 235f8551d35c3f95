//! Scripted client for tests and offline runs.

use super::LlmClient;
use crate::model::{ChatMessage, Completion, Role, TokenUsage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum FakeReply {
    Text {
        text: String,
        usage: Option<TokenUsage>,
    },
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeCall {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Replies per model id; models without a script get an echo of the user
/// message tagged with the model id.
#[derive(Debug, Default)]
pub struct FakeClient {
    replies: HashMap<String, FakeReply>,
    delays: HashMap<String, Duration>,
    delay: Duration,
    calls: Mutex<Vec<FakeCall>>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, model_id: &str, text: &str, usage: Option<TokenUsage>) -> Self {
        self.replies.insert(
            model_id.to_string(),
            FakeReply::Text {
                text: text.to_string(),
                usage,
            },
        );
        self
    }

    pub fn with_error(mut self, model_id: &str, message: &str) -> Self {
        self.replies
            .insert(model_id.to_string(), FakeReply::Error(message.to_string()));
        self
    }

    /// Latency applied to every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_model_delay(mut self, model_id: &str, delay: Duration) -> Self {
        self.delays.insert(model_id.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn echo(messages: &[ChatMessage], model_id: &str) -> Completion {
        let user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let text = format!("[{}] {}", model_id, user);
        let prompt_tokens: u64 = messages
            .iter()
            .map(|m| m.content.split_whitespace().count() as u64)
            .sum();
        let completion_tokens = text.split_whitespace().count() as u64;
        Completion {
            text,
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        }
    }
}

#[async_trait]
impl LlmClient for FakeClient {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
    ) -> anyhow::Result<Completion> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FakeCall {
                model_id: model_id.to_string(),
                messages: messages.to_vec(),
            });

        let delay = self.delays.get(model_id).copied().unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.replies.get(model_id) {
            Some(FakeReply::Text { text, usage }) => Ok(Completion {
                text: text.clone(),
                usage: *usage,
            }),
            Some(FakeReply::Error(msg)) => Err(anyhow::anyhow!("{}", msg)),
            None => Ok(Self::echo(messages, model_id)),
        }
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}
