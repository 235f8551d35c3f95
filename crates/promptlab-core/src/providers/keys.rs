use super::Provider;
use std::collections::BTreeMap;

/// Precondition checked before any provider is contacted.
pub trait Entitlements: Send + Sync {
    fn has_valid_key_for_model(&self, model_id: &str) -> bool;

    /// Human readable reason written to the cell when the check fails.
    fn denial_reason(&self, model_id: &str) -> String {
        match Provider::from_model_id(model_id) {
            Some(p) => format!("No valid API key configured for {} (model {})", p, model_id),
            None => format!("No provider available for model {}", model_id),
        }
    }
}

/// Everything is allowed. For offline runs against the fake client.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Entitlements for AllowAll {
    fn has_valid_key_for_model(&self, _model_id: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: BTreeMap<Provider, String>,
}

impl ApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, provider: Provider, key: impl Into<String>) -> Self {
        self.set(provider, key);
        self
    }

    pub fn set(&mut self, provider: Provider, key: impl Into<String>) {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            self.keys.remove(&provider);
        } else {
            self.keys.insert(provider, key);
        }
    }

    pub fn get(&self, provider: Provider) -> Option<&str> {
        self.keys.get(&provider).map(String::as_str)
    }

    /// Reads each provider's key from the named environment variable.
    pub fn from_env(var_names: &BTreeMap<Provider, String>) -> Self {
        let mut keys = Self::new();
        for provider in [Provider::OpenAi, Provider::Anthropic] {
            let var = var_names
                .get(&provider)
                .map(String::as_str)
                .unwrap_or(provider.default_key_env());
            if let Ok(v) = std::env::var(var) {
                keys.set(provider, v);
            }
        }
        keys
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.keys.keys().copied().collect()
    }
}

impl Entitlements for ApiKeys {
    fn has_valid_key_for_model(&self, model_id: &str) -> bool {
        Provider::from_model_id(model_id)
            .and_then(|p| self.get(p))
            .is_some()
    }
}
