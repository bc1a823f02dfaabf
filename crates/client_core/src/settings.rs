//! User-supplied LLM provider credentials, persisted in local storage.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::protocol::LlmConfigPayload;
use storage::KeyValueStore;
use tracing::{info, warn};

use crate::error::ClientError;

pub const LLM_CONFIG_STORAGE_KEY: &str = "llm_config";
pub const DEFAULT_PROVIDER: &str = "openai";
pub const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub models: &'static [&'static str],
    pub key_hint: &'static str,
}

pub const PROVIDERS: [ProviderInfo; 4] = [
    ProviderInfo {
        id: "openai",
        name: "OpenAI",
        models: &["gpt-4o", "gpt-4-turbo"],
        key_hint: "sk-...",
    },
    ProviderInfo {
        id: "anthropic",
        name: "Anthropic",
        models: &["claude-3-5-sonnet-20240620", "claude-3-opus-20240229"],
        key_hint: "sk-ant-...",
    },
    ProviderInfo {
        id: "google",
        name: "Google Gemini",
        models: &["gemini/gemini-1.5-pro", "gemini/gemini-1.5-flash"],
        key_hint: "AIza...",
    },
    ProviderInfo {
        id: "deepseek",
        name: "DeepSeek",
        models: &["deepseek-chat"],
        key_hint: "sk-...",
    },
];

pub fn provider(id: &str) -> Option<&'static ProviderInfo> {
    PROVIDERS.iter().find(|provider| provider.id == id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
        }
    }
}

// Stored records written by older clients may miss fields.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredLlmConfig {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, alias = "api_key")]
    api_key: Option<String>,
}

impl LlmConfig {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    /// Switches provider and resets the model to that provider's first model.
    pub fn select_provider(&mut self, provider_id: &str) {
        if self.provider == provider_id {
            return;
        }
        self.provider = provider_id.to_string();
        if let Some(model) = provider(provider_id).and_then(|info| info.models.first()) {
            self.model = (*model).to_string();
        }
    }

    pub fn provider_info(&self) -> Option<&'static ProviderInfo> {
        provider(&self.provider)
    }

    pub fn to_payload(&self) -> LlmConfigPayload {
        LlmConfigPayload {
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
        }
    }

    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        match chars.len() {
            0 => "(not set)".to_string(),
            1..=8 => "•".repeat(chars.len()),
            len => {
                let tail: String = chars[len - 4..].iter().collect();
                format!("{}{tail}", "•".repeat(len - 4))
            }
        }
    }

    fn merged_over_defaults(stored: StoredLlmConfig) -> Self {
        let defaults = Self::default();
        let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
        Self {
            provider: non_empty(stored.provider).unwrap_or(defaults.provider),
            model: non_empty(stored.model).unwrap_or(defaults.model),
            api_key: stored.api_key.unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The saved config, or `None` when nothing usable is stored.
    pub async fn saved(&self) -> Result<Option<LlmConfig>> {
        let Some(raw) = self
            .store
            .get_item(LLM_CONFIG_STORAGE_KEY)
            .await
            .map_err(|err| storage_error("read", err))?
        else {
            return Ok(None);
        };

        match serde_json::from_str::<StoredLlmConfig>(&raw) {
            Ok(stored) => Ok(Some(LlmConfig::merged_over_defaults(stored))),
            Err(err) => {
                warn!(error = %err, "ignoring malformed saved LLM settings");
                Ok(None)
            }
        }
    }

    /// Values shown when the settings dialog opens.
    pub async fn load_for_dialog(&self) -> Result<LlmConfig> {
        Ok(self.saved().await?.unwrap_or_default())
    }

    pub async fn save(&self, config: &LlmConfig) -> Result<()> {
        let raw = serde_json::to_string(config).context("failed to encode LLM settings")?;
        self.store
            .set_item(LLM_CONFIG_STORAGE_KEY, &raw)
            .await
            .map_err(|err| storage_error("save", err))?;
        info!(provider = %config.provider, model = %config.model, "saved LLM settings");
        Ok(())
    }

    pub async fn clear(&self) -> Result<bool> {
        let removed = self
            .store
            .remove_item(LLM_CONFIG_STORAGE_KEY)
            .await
            .map_err(|err| storage_error("clear", err))?;
        Ok(removed)
    }
}

fn storage_error(action: &str, err: anyhow::Error) -> ClientError {
    ClientError::Storage(format!("failed to {action} LLM settings: {err:#}"))
}
