//! Registry construction and the Purpose Gate (§4.9 "At construction").

use crate::core::cost::{EmptyCatalog, MetadataCatalog};
use crate::core::driver::{Driver, ModelValidator};
use crate::core::router::cooldown::{CooldownMap, ProviderStatus};
use crate::core::router::resolver::{build_driver, parse_model_ref};
use crate::core::types::config::{GatewayConfig, ProviderConfig};
use crate::error::{GatewayError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Required and warn-only capability names the Purpose Gate checks for one
/// purpose. Only `agent` declares a required set today (§4.9 example); all
/// other purposes pass through ungated on capabilities.
fn purpose_requirements(purpose: &str) -> (&'static [&'static str], &'static [&'static str]) {
    match purpose {
        "agent" => (&["tool_use"], &["vision"]),
        _ => (&[], &[]),
    }
}

fn has_capability(caps: &crate::core::cost::ModelCapabilities, name: &str) -> bool {
    match name {
        "tool_use" => caps.tool_use,
        "vision" => caps.vision,
        _ => true,
    }
}

/// One `alias/model` entry dropped by the Purpose Gate, kept for the
/// construction-failure message (§4.9: "a message enumerating each removed
/// entry").
#[derive(Debug, Clone)]
struct Removal {
    reference: String,
    reason: String,
}

/// The resolved, gated candidate chain for one purpose.
#[derive(Debug, Clone, Default)]
pub struct GatedChain {
    pub references: Vec<String>,
}

/// Owns one driver instance per configured provider alias plus the
/// post-gate candidate chain for every purpose (§4.9, §3 "Driver Instance").
pub struct Registry {
    providers: RwLock<HashMap<String, ProviderConfig>>,
    drivers: RwLock<HashMap<String, Arc<Driver>>>,
    purposes: RwLock<HashMap<String, GatedChain>>,
    pub(crate) cooldowns: CooldownMap,
    catalog: Arc<dyn MetadataCatalog>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("providers", &self.providers)
            .field("purposes", &self.purposes)
            .field("cooldowns", &self.cooldowns)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Build a new registry from persisted configuration, running the
    /// Purpose Gate over every non-empty purpose chain (§4.9).
    pub fn new(config: &GatewayConfig, catalog: Arc<dyn MetadataCatalog>) -> Result<Self> {
        let mut drivers = HashMap::new();
        for (alias, provider_config) in &config.providers {
            // Bound to no model yet; `resolve` clones via `with_model` per call.
            drivers.insert(alias.clone(), Arc::new(build_driver(alias, "", provider_config)));
        }

        let registry = Self {
            providers: RwLock::new(config.providers.clone()),
            drivers: RwLock::new(drivers),
            purposes: RwLock::new(HashMap::new()),
            cooldowns: CooldownMap::new(),
            catalog,
        };

        let mut purpose_names: Vec<&str> = vec!["agent", "summarization", "embeddings"];
        for name in config.extra_purposes.keys() {
            purpose_names.push(name.as_str());
        }

        for name in purpose_names {
            let Some(purpose_config) = config.purpose(name) else { continue };
            if purpose_config.is_empty() {
                registry
                    .purposes
                    .write()
                    .insert(name.to_string(), GatedChain::default());
                continue;
            }
            let (kept, removed) = registry.gate_purpose(name, &purpose_config.models)?;
            if kept.is_empty() && name == "agent" {
                let summary = removed
                    .iter()
                    .map(|r| format!("{} ({})", r.reference, r.reason))
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(GatewayError::PurposeExhausted {
                    purpose: name.to_string(),
                    removed: summary,
                });
            }
            registry
                .purposes
                .write()
                .insert(name.to_string(), GatedChain { references: kept });
        }

        Ok(registry)
    }

    pub fn with_default_catalog(config: &GatewayConfig) -> Result<Self> {
        Self::new(config, Arc::new(EmptyCatalog))
    }

    /// Run the Purpose Gate over one chain: a fatal model-validator result
    /// aborts registry construction immediately (§4.9 step 2(a)); non-fatal
    /// validator results and missing required capabilities drop the entry
    /// without aborting (§4.9 step 2).
    fn gate_purpose(&self, purpose: &str, references: &[String]) -> Result<(Vec<String>, Vec<Removal>)> {
        let mut kept = Vec::new();
        let mut removed = Vec::new();

        for reference in references {
            let Ok((alias, model)) = parse_model_ref(reference) else {
                removed.push(Removal {
                    reference: reference.clone(),
                    reason: "malformed alias/model reference".to_string(),
                });
                continue;
            };
            let Some(provider_config) = self.providers.read().get(alias).cloned() else {
                removed.push(Removal {
                    reference: reference.clone(),
                    reason: format!("unknown provider alias '{alias}'"),
                });
                continue;
            };

            let driver = build_driver(alias, model, &provider_config);
            if let Some(validator) = driver.as_validator() {
                if let Some(validation) = validator.validate_model(model) {
                    if validation.fatal {
                        return Err(GatewayError::UnsupportedModel {
                            driver: alias.to_string(),
                            model: model.to_string(),
                            message: validation.message,
                        });
                    }
                    removed.push(Removal {
                        reference: reference.clone(),
                        reason: validation.message,
                    });
                    continue;
                }
            }

            if let Some(caps) = self.catalog.capabilities(driver.metadata_provider(), model) {
                let (required, _warn) = purpose_requirements(purpose);
                let missing_required = required.iter().find(|name| !has_capability(&caps, name));
                if let Some(missing) = missing_required {
                    removed.push(Removal {
                        reference: reference.clone(),
                        reason: format!("missing required capability '{missing}'"),
                    });
                    continue;
                }
            }

            kept.push(reference.clone());
        }

        Ok((kept, removed))
    }

    /// Driver bound to a specific model, cloned from the alias's base
    /// instance (§3 "Driver Instance"). `None` when the alias isn't
    /// configured.
    pub fn resolve(&self, alias: &str, model: &str) -> Option<Driver> {
        self.drivers.read().get(alias).map(|driver| driver.with_model(model))
    }

    pub fn purpose_chain(&self, purpose: &str) -> Vec<String> {
        self.purposes
            .read()
            .get(purpose)
            .map(|chain| chain.references.clone())
            .unwrap_or_default()
    }

    pub fn agent_chain(&self) -> Vec<String> {
        self.purpose_chain("agent")
    }

    pub fn provider_config(&self, alias: &str) -> Option<ProviderConfig> {
        self.providers.read().get(alias).cloned()
    }

    pub fn catalog(&self) -> &dyn MetadataCatalog {
        self.catalog.as_ref()
    }

    /// `{in_cooldown, until, reason, error_count}` per alias (§4.10).
    pub fn provider_status(&self) -> HashMap<String, ProviderStatus> {
        self.cooldowns.all_statuses(SystemTime::now())
    }

    /// Force-reset every alias's cooldown entry (§4.10).
    pub fn clear_all_cooldowns(&self) {
        self.cooldowns.clear_all();
    }
}
