use super::llm::LlmClient;
use super::Provider;
use crate::model::{ChatMessage, Completion};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Dispatches each invocation to the client registered for the model's
/// provider.
#[derive(Clone, Default)]
pub struct ProviderRouter {
    clients: BTreeMap<Provider, Arc<dyn LlmClient>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Provider, client: Arc<dyn LlmClient>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    pub fn client_for(&self, model_id: &str) -> Option<&Arc<dyn LlmClient>> {
        Provider::from_model_id(model_id).and_then(|p| self.clients.get(&p))
    }
}

#[async_trait]
impl LlmClient for ProviderRouter {
    async fn invoke(
        &self,
        messages: &[ChatMessage],
        model_id: &str,
    ) -> anyhow::Result<Completion> {
        let client = self
            .client_for(model_id)
            .ok_or_else(|| anyhow::anyhow!("Unsupported model: {}", model_id))?;
        client.invoke(messages, model_id).await
    }

    fn provider_name(&self) -> &'static str {
        "router"
    }
}
