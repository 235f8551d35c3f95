use crate::catalog::{ModelCatalog, ModelInfo};
use crate::errors::ConfigError;
use crate::providers::Provider;
use crate::storage::MatrixStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_LOG: &str = "PROMPTLAB_LOG";
pub const ENV_SNAPSHOT: &str = "PROMPTLAB_SNAPSHOT";
pub const ENV_SYNC_DEBOUNCE_MS: &str = "PROMPTLAB_SYNC_DEBOUNCE_MS";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabConfig {
    /// Replaces the built-in catalog when non-empty.
    pub models: Vec<ModelInfo>,
    pub providers: BTreeMap<Provider, ProviderSettings>,
    pub sync: SyncSettings,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    /// Sampling temperature; the provider default applies when unset.
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub debounce_ms: u64,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            snapshot_path: None,
        }
    }
}

impl LabConfig {
    pub fn catalog(&self) -> ModelCatalog {
        if self.models.is_empty() {
            ModelCatalog::default()
        } else {
            ModelCatalog::new(self.models.clone())
        }
    }

    /// Key variable per provider, falling back to the conventional name.
    pub fn key_env_names(&self) -> BTreeMap<Provider, String> {
        [Provider::OpenAi, Provider::Anthropic]
            .into_iter()
            .map(|p| {
                let name = self
                    .providers
                    .get(&p)
                    .and_then(|s| s.api_key_env.clone())
                    .unwrap_or_else(|| p.default_key_env().to_string());
                (p, name)
            })
            .collect()
    }

    pub fn base_url(&self, provider: Provider) -> Option<&str> {
        self.providers
            .get(&provider)
            .and_then(|s| s.base_url.as_deref())
    }

    pub fn temperature(&self, provider: Provider) -> Option<f32> {
        self.providers.get(&provider).and_then(|s| s.temperature)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.sync.debounce_ms)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|k| std::env::var(k).ok())
    }

    /// Applies `PROMPTLAB_*` overrides read through `lookup`. Blank values are
    /// ignored.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        if let Some(level) = get(ENV_LOG) {
            self.log_level = Some(level);
        }
        if let Some(path) = get(ENV_SNAPSHOT) {
            self.sync.snapshot_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = get(ENV_SYNC_DEBOUNCE_MS) {
            self.sync.debounce_ms = ms.trim().parse().map_err(|_| {
                ConfigError(format!(
                    "{} must be a whole number of milliseconds, got {:?}",
                    ENV_SYNC_DEBOUNCE_MS, ms
                ))
            })?;
        }
        Ok(())
    }
}

fn read_yaml<T: DeserializeOwned>(path: &Path, what: &str, strict: bool) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read {} {}: {}", what, path.display(), e)))?;

    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(&raw);
    let value: T = serde_ignored::deserialize(deserializer, |p| {
        ignored_keys.insert(p.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML in {}: {}", path.display(), e)))?;

    // anchors and extension keys are allowed
    let mut unknown: Vec<_> = ignored_keys
        .into_iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    unknown.sort();

    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "Unknown fields detected in strict mode: {:?} (file: {})",
                unknown,
                path.display()
            )));
        }
        tracing::warn!(
            event = "config_unknown_fields",
            file = %path.display(),
            fields = ?unknown
        );
    }
    Ok(value)
}

pub fn load_config(path: &Path, strict: bool) -> Result<LabConfig, ConfigError> {
    let cfg: LabConfig = read_yaml(path, "config", strict)?;

    if let Some(dup) = first_duplicate(cfg.models.iter().map(|m| m.id.as_str())) {
        return Err(ConfigError(format!("model {} is listed twice", dup)));
    }
    Ok(cfg)
}

fn first_duplicate<'a>(ids: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = HashSet::new();
    ids.into_iter().find(|id| !seen.insert(*id))
}

/// One prompt with its test inputs, as run by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatrixFile {
    pub title: Option<String>,
    pub instruction: String,
    pub variables: BTreeMap<String, String>,
    pub inputs: Vec<String>,
    /// Defaults to the catalog's default selection when empty.
    pub models: Vec<String>,
    /// JSON Schema, either as text or inline.
    pub schema: Option<serde_json::Value>,
}

impl MatrixFile {
    pub fn schema_text(&self) -> Option<String> {
        match self.schema.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Creates the prompt in `store` and returns `(prompt_id, version_id)`.
    pub fn seed(&self, store: &MatrixStore) -> Option<(String, String)> {
        let prompt_id = store.create_prompt(&self.instruction);
        let version_id = store.prompt(&prompt_id)?.latest_version()?.id.clone();

        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            store.rename_version(&prompt_id, &version_id, title);
        }
        if !self.models.is_empty() {
            store.set_selected_models(&prompt_id, &version_id, self.models.clone());
        }
        store.set_schema(&prompt_id, &version_id, self.schema_text());
        for (name, value) in &self.variables {
            store.set_variable(&prompt_id, name, value);
        }

        let blank_row = store.prompt(&prompt_id)?.inputs.first()?.id.clone();
        let mut inputs = self.inputs.iter();
        if let Some(first) = inputs.next() {
            store.update_input_row(&prompt_id, &blank_row, first);
        }
        for input in inputs {
            store.add_input_row(&prompt_id, input);
        }

        Some((prompt_id, version_id))
    }
}

pub fn load_matrix_file(path: &Path, strict: bool) -> Result<MatrixFile, ConfigError> {
    let m: MatrixFile = read_yaml(path, "matrix file", strict)?;
    if m.instruction.trim().is_empty() {
        return Err(ConfigError(format!(
            "matrix file {} has no instruction",
            path.display()
        )));
    }
    Ok(m)
}
