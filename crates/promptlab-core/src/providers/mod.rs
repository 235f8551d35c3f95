use serde::{Deserialize, Serialize};
use std::fmt;

pub mod keys;
pub mod llm;
pub mod router;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[serde(alias = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    /// Owning provider by model naming convention.
    pub fn from_model_id(model_id: &str) -> Option<Self> {
        let id = model_id.trim().to_ascii_lowercase();
        if id.starts_with("gpt-")
            || id.starts_with("chatgpt-")
            || ["o1", "o3", "o4"]
                .iter()
                .any(|p| id == *p || id.starts_with(&format!("{}-", p)))
        {
            Some(Provider::OpenAi)
        } else if id.starts_with("claude-") {
            Some(Provider::Anthropic)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }

    pub fn default_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_naming_convention() {
        assert_eq!(Provider::from_model_id("gpt-4o"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_model_id("o3-mini"), Some(Provider::OpenAi));
        assert_eq!(Provider::from_model_id("o1"), Some(Provider::OpenAi));
        assert_eq!(
            Provider::from_model_id("claude-3-5-haiku-latest"),
            Some(Provider::Anthropic)
        );
        assert_eq!(Provider::from_model_id("olmo-7b"), None);
        assert_eq!(Provider::from_model_id("llama-3"), None);
    }

    #[test]
    fn parses_both_spellings() {
        let a: Provider = serde_yaml::from_str("openai").unwrap();
        let b: Provider = serde_yaml::from_str("open_ai").unwrap();
        assert_eq!(a, b);
    }
}
