//! Persisted configuration loading and the atomic `apply` operation (§6).
//!
//! Loading a [`GatewayConfig`] from disk and turning it into a running
//! [`Registry`] are kept separate: `apply` builds a brand-new registry
//! (running the Purpose Gate in full) and only swaps it into the global
//! singleton once construction succeeds, so a bad config never tears down a
//! working one.

use crate::core::cost::{EmptyCatalog, MetadataCatalog};
use crate::core::router::Registry;
use crate::core::types::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Parse a persisted [`GatewayConfig`] document. Supports both JSON and
/// YAML, the two shapes the wire format in §6 is carried over (`config`
/// crate's merged `File` source would equally accept either by extension;
/// this loader accepts raw text directly so callers aren't tied to a path).
pub fn parse_config(text: &str, format: ConfigFormat) -> Result<GatewayConfig> {
    match format {
        ConfigFormat::Json => {
            serde_json::from_str(text).map_err(|e| GatewayError::Config(format!("invalid JSON config: {e}")))
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(text).map_err(|e| GatewayError::Config(format!("invalid YAML config: {e}")))
        }
    }
}

/// Load a [`GatewayConfig`] from a file path, inferring format from the
/// extension (`.yaml`/`.yml` vs. everything else, treated as JSON).
pub fn load_config_file(path: impl AsRef<Path>) -> Result<GatewayConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("could not read {}: {e}", path.display())))?;
    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => ConfigFormat::Yaml,
        _ => ConfigFormat::Json,
    };
    parse_config(&text, format)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
}

/// Event broadcast after a successful [`GatewaySingleton::apply`] (§6:
/// `llm.config.applied`). Carries nothing beyond the notification itself —
/// subscribers re-read the singleton if they need the new state.
#[derive(Debug, Clone, Copy)]
pub struct ConfigApplied;

/// The atomically-swappable global registry singleton plus its apply-event
/// bus (§5 "rebuilt wholesale on configuration apply (atomic replacement of
/// the global singleton)", §6 "Configuration apply").
pub struct GatewaySingleton {
    current: ArcSwap<Registry>,
    catalog: Arc<dyn MetadataCatalog>,
    applied: broadcast::Sender<ConfigApplied>,
}

impl std::fmt::Debug for GatewaySingleton {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySingleton").finish_non_exhaustive()
    }
}

impl GatewaySingleton {
    /// Build the initial singleton from a config, using `catalog` for every
    /// subsequent `apply` as well (the metadata-catalog seam itself isn't
    /// reloaded by config changes).
    pub fn new(config: &GatewayConfig, catalog: Arc<dyn MetadataCatalog>) -> Result<Self> {
        let registry = Registry::new(config, catalog.clone())?;
        let (applied, _receiver) = broadcast::channel(16);
        Ok(Self {
            current: ArcSwap::from_pointee(registry),
            catalog,
            applied,
        })
    }

    pub fn with_default_catalog(config: &GatewayConfig) -> Result<Self> {
        Self::new(config, Arc::new(EmptyCatalog))
    }

    /// Current registry snapshot. Cheap: an `Arc` clone under a lock-free
    /// read of the swap pointer.
    pub fn current(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    /// Build a fresh [`Registry`] from `new_config`, running the Purpose
    /// Gate in full, and only then atomically replace the singleton (§6
    /// "Configuration apply"). Subscribers are notified via
    /// `llm.config.applied`; a lack of subscribers is not an error.
    pub fn apply(&self, new_config: &GatewayConfig) -> Result<()> {
        let registry = Registry::new(new_config, self.catalog.clone())?;
        self.current.store(Arc::new(registry));
        let _ = self.applied.send(ConfigApplied);
        Ok(())
    }

    /// Subscribe to `llm.config.applied` notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigApplied> {
        self.applied.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn minimal_config_json() -> &'static str {
        r#"{
            "providers": {
                "anthropic": { "driver": "anthropic", "api_key": "sk-test" }
            },
            "agent": { "models": ["anthropic/claude-opus-4.5"] },
            "summarization": { "models": [] },
            "embeddings": { "models": [] },
            "thinking": { "defaultLevel": "medium" },
            "systemPrompt": "be helpful"
        }"#
    }

    #[test]
    fn parses_json_config() {
        let config = parse_config(minimal_config_json(), ConfigFormat::Json).unwrap();
        assert_eq!(config.agent.models, vec!["anthropic/claude-opus-4.5"]);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_config("{not json", ConfigFormat::Json).is_err());
    }

    #[test]
    fn apply_replaces_the_singleton_and_notifies_subscribers() {
        let config = parse_config(minimal_config_json(), ConfigFormat::Json).unwrap();
        let singleton = GatewaySingleton::with_default_catalog(&config).unwrap();
        let mut receiver = singleton.subscribe();

        let mut next = config.clone();
        next.providers.insert(
            "openai".to_string(),
            serde_json::from_value(serde_json::json!({"driver": "openai_compatible", "api_key": "sk-2"})).unwrap(),
        );
        next.agent.models.push("openai/gpt-5".to_string());

        singleton.apply(&next).unwrap();
        assert_eq!(singleton.current().agent_chain().len(), 2);
        receiver.try_recv().expect("apply should broadcast a notification");
    }

    #[test]
    fn apply_with_a_bad_config_does_not_tear_down_the_running_registry() {
        let config = parse_config(minimal_config_json(), ConfigFormat::Json).unwrap();
        let singleton = GatewaySingleton::with_default_catalog(&config).unwrap();

        let mut bad = config.clone();
        bad.providers = HashMap::new();
        bad.agent.models = vec!["missing/model".to_string()];

        assert!(singleton.apply(&bad).is_err());
        assert_eq!(singleton.current().agent_chain(), vec!["anthropic/claude-opus-4.5"]);
    }
}
