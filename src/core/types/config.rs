//! Persisted configuration shape (§6) and the typed structs the rest of
//! the crate works with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The four concrete drivers plus the OpenAI-compatible family (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Anthropic,
    OpenaiCompatible,
    Ollama,
    ResponsesApi,
    Xai,
}

/// One provider alias's configuration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub driver: DriverKind,
    /// Free-form hint resolving metadata-catalog lookups (e.g. an
    /// OpenRouter-fronted model family).
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub context_tokens: Option<u32>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub prompt_caching: bool,
    #[serde(default)]
    pub embedding_only: bool,
    #[serde(default)]
    pub incremental_context: bool,
    #[serde(default)]
    pub server_tools_allowed: Option<Vec<String>>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub keepalive_time: Option<u64>,
    #[serde(default)]
    pub keepalive_timeout: Option<u64>,

    #[serde(default)]
    pub cost_per_million_input: Option<f64>,
    #[serde(default)]
    pub cost_per_million_output: Option<f64>,
    #[serde(default)]
    pub cost_per_million_cache_read: Option<f64>,
    #[serde(default)]
    pub cost_per_million_cache_write: Option<f64>,

    #[serde(default)]
    pub trace: bool,
    #[serde(default)]
    pub dump_on_success: bool,
}

fn default_timeout_seconds() -> u64 {
    120
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// An ordered chain of `alias/model` references for one purpose (§3, §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurposeConfig {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub max_input_tokens: Option<u32>,
    /// Embeddings-only: whether an index rebuild is triggered automatically
    /// on dimension mismatch. The core only carries the flag through;
    /// acting on it is an external collaborator's job.
    #[serde(default)]
    pub auto_rebuild: Option<bool>,
}

impl PurposeConfig {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// `thinking` section of the persisted config (§6, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfigSection {
    #[serde(default = "default_thinking_level", rename = "defaultLevel")]
    pub default_level: String,
    #[serde(default, rename = "budgetTokens")]
    pub budget_tokens: Option<u32>,
}

fn default_thinking_level() -> String {
    "medium".to_string()
}

impl Default for ThinkingConfigSection {
    fn default() -> Self {
        Self {
            default_level: default_thinking_level(),
            budget_tokens: None,
        }
    }
}

/// The full persisted JSON document (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub agent: PurposeConfig,
    #[serde(default)]
    pub summarization: PurposeConfig,
    #[serde(default)]
    pub embeddings: PurposeConfig,
    #[serde(default)]
    pub thinking: ThinkingConfigSection,
    #[serde(default, rename = "systemPrompt")]
    pub system_prompt: String,
    /// Extra named purposes (`heartbeat`, `cron`, `hass`, ...) beyond the
    /// three the wire shape names explicitly.
    #[serde(flatten, default)]
    pub extra_purposes: HashMap<String, PurposeConfig>,
}

impl GatewayConfig {
    /// Look up a purpose by name, whether it's one of the three named
    /// fields or one of the free-form `extra_purposes`.
    pub fn purpose(&self, name: &str) -> Option<&PurposeConfig> {
        match name {
            "agent" => Some(&self.agent),
            "summarization" => Some(&self.summarization),
            "embeddings" => Some(&self.embeddings),
            other => self.extra_purposes.get(other),
        }
    }
}
