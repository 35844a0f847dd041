//! Pricing resolution: config overrides take precedence over the metadata
//! catalog, with zero substituted for any still-missing field (§4.6 step 1).

use crate::core::types::config::ProviderConfig;

/// Per-million-token prices, all in USD. Any field left `None` is treated
/// as zero by [`CostBreakdown::from_usage`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceTable {
    pub input: Option<f64>,
    pub output: Option<f64>,
    pub cache_read: Option<f64>,
    pub cache_write: Option<f64>,
}

/// Capability flags the Purpose Gate checks against a purpose's required
/// and warn-only sets (§4.9). `None` from [`MetadataCatalog::capabilities`]
/// means the model is unknown to the catalog and is kept optimistically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub tool_use: bool,
    pub vision: bool,
}

/// Looks up per-model prices and capabilities from an external catalog,
/// keyed by `(metadata_provider, model)`. The core only consumes this
/// interface — populating the catalog is an external collaborator's job
/// (§1 Out of scope: "the external model-metadata catalog").
pub trait MetadataCatalog: Send + Sync {
    fn price_table(&self, metadata_provider: &str, model: &str) -> Option<PriceTable>;

    /// Defaults to "unknown" so a catalog that only tracks pricing doesn't
    /// accidentally fail every model out of the Purpose Gate.
    fn capabilities(&self, _metadata_provider: &str, _model: &str) -> Option<ModelCapabilities> {
        None
    }
}

/// A catalog with nothing in it; every lookup resolves to `None`, so
/// pricing falls through entirely to config overrides (and then to zero).
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCatalog;

impl MetadataCatalog for EmptyCatalog {
    fn price_table(&self, _metadata_provider: &str, _model: &str) -> Option<PriceTable> {
        None
    }
}

/// Resolve the effective price table for one call: config override per
/// field, else the catalog's table, else zero for that field (§4.6 step 1).
pub fn resolve_prices(
    provider: &ProviderConfig,
    metadata_provider: &str,
    model: &str,
    catalog: &dyn MetadataCatalog,
) -> PriceTable {
    let catalog_table = catalog.price_table(metadata_provider, model).unwrap_or_default();
    PriceTable {
        input: provider.cost_per_million_input.or(catalog_table.input),
        output: provider.cost_per_million_output.or(catalog_table.output),
        cache_read: provider
            .cost_per_million_cache_read
            .or(catalog_table.cache_read),
        cache_write: provider
            .cost_per_million_cache_write
            .or(catalog_table.cache_write),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::config::DriverKind;

    fn provider(overrides: PriceTable) -> ProviderConfig {
        ProviderConfig {
            driver: DriverKind::Anthropic,
            subtype: None,
            api_key: None,
            base_url: None,
            url: None,
            max_tokens: None,
            context_tokens: None,
            timeout_seconds: 120,
            prompt_caching: false,
            embedding_only: false,
            incremental_context: false,
            server_tools_allowed: None,
            max_turns: None,
            keepalive_time: None,
            keepalive_timeout: None,
            cost_per_million_input: overrides.input,
            cost_per_million_output: overrides.output,
            cost_per_million_cache_read: overrides.cache_read,
            cost_per_million_cache_write: overrides.cache_write,
            trace: false,
            dump_on_success: false,
        }
    }

    struct FixedCatalog(PriceTable);

    impl MetadataCatalog for FixedCatalog {
        fn price_table(&self, _metadata_provider: &str, _model: &str) -> Option<PriceTable> {
            Some(self.0)
        }
    }

    #[test]
    fn config_override_wins_over_catalog() {
        let provider = provider(PriceTable {
            input: Some(3.0),
            ..Default::default()
        });
        let catalog = FixedCatalog(PriceTable {
            input: Some(99.0),
            output: Some(15.0),
            ..Default::default()
        });

        let resolved = resolve_prices(&provider, "anthropic", "claude-opus", &catalog);
        assert_eq!(resolved.input, Some(3.0));
        assert_eq!(resolved.output, Some(15.0));
    }

    #[test]
    fn missing_everywhere_resolves_to_none_and_costs_zero() {
        let provider = provider(PriceTable::default());
        let resolved = resolve_prices(&provider, "anthropic", "claude-opus", &EmptyCatalog);
        assert_eq!(resolved, PriceTable::default());
    }
}
