use crate::model::{ChatMessage, Completion};
use async_trait::async_trait;

/// The model invocation capability. One implementation per provider; callers
/// check entitlement before invoking.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn invoke(&self, messages: &[ChatMessage], model_id: &str)
        -> anyhow::Result<Completion>;
    fn provider_name(&self) -> &'static str;
}

pub mod anthropic;
pub mod fake;
pub mod openai;
