use crate::model::TokenUsage;
use crate::providers::Provider;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelPrice {
    pub input_price_per_k_token: f64,
    pub output_price_per_k_token: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Inferred from the id when omitted.
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(flatten)]
    pub price: ModelPrice,
}

impl ModelInfo {
    pub fn new(id: &str, name: &str, input: f64, output: f64) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            provider: Provider::from_model_id(id),
            price: ModelPrice {
                input_price_per_k_token: input,
                output_price_per_k_token: output,
            },
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        self.provider.or_else(|| Provider::from_model_id(&self.id))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Read-side price lookup, only used to derive display cost.
pub trait PriceLookup: Send + Sync {
    fn price(&self, model_id: &str) -> Option<ModelPrice>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    models: Vec<ModelInfo>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(vec![
            ModelInfo::new("gpt-4o-mini", "GPT-4o mini", 0.00015, 0.0006),
            ModelInfo::new("claude-3-5-haiku-latest", "Claude 3.5 Haiku", 0.0008, 0.004),
            ModelInfo::new("gpt-4o", "GPT-4o", 0.0025, 0.01),
            ModelInfo::new("claude-3-5-sonnet-latest", "Claude 3.5 Sonnet", 0.003, 0.015),
            ModelInfo::new("o3-mini", "o3-mini", 0.0011, 0.0044),
        ])
    }
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelInfo>) -> Self {
        Self { models }
    }

    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == model_id)
    }

    /// Selection given to a freshly created prompt: the first two models.
    pub fn default_selection(&self) -> Vec<String> {
        self.models.iter().take(2).map(|m| m.id.clone()).collect()
    }
}

impl PriceLookup for ModelCatalog {
    fn price(&self, model_id: &str) -> Option<ModelPrice> {
        self.get(model_id).map(|m| m.price)
    }
}

pub fn derive_cost(usage: &TokenUsage, price: &ModelPrice) -> f64 {
    (usage.prompt_tokens as f64 / 1000.0) * price.input_price_per_k_token
        + (usage.completion_tokens as f64 / 1000.0) * price.output_price_per_k_token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_is_first_two() {
        let c = ModelCatalog::default();
        assert_eq!(
            c.default_selection(),
            vec!["gpt-4o-mini".to_string(), "claude-3-5-haiku-latest".to_string()]
        );
    }

    #[test]
    fn cost_uses_per_thousand_prices() {
        let price = ModelPrice {
            input_price_per_k_token: 0.5,
            output_price_per_k_token: 1.5,
        };
        let usage = TokenUsage {
            prompt_tokens: 2000,
            completion_tokens: 1000,
            total_tokens: 3000,
        };
        assert!((derive_cost(&usage, &price) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn lookup_misses_unknown_models() {
        let c = ModelCatalog::default();
        assert!(c.price("gpt-4o").is_some());
        assert!(c.price("nope").is_none());
    }

    #[test]
    fn provider_is_inferred_when_omitted() {
        let m: ModelInfo = serde_yaml::from_str(
            "id: claude-3-opus\ninput_price_per_k_token: 0.015\noutput_price_per_k_token: 0.075\n",
        )
        .unwrap();
        assert_eq!(m.provider(), Some(Provider::Anthropic));
        assert_eq!(m.display_name(), "claude-3-opus");
    }
}
