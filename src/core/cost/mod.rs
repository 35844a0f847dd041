//! Cost & Metrics Emitter: resolves pricing, computes per-call cost, and
//! emits token/duration/outcome counters (§4.6).

pub mod metrics;
pub mod pricing;

pub use metrics::MetricsEmitter;
pub use pricing::{resolve_prices, EmptyCatalog, MetadataCatalog, ModelCapabilities, PriceTable};

use crate::core::types::response::Usage;

/// Per-call cost in USD, broken down by token category (§4.6 step 2).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.input + self.output + self.cache_read + self.cache_write
    }
}

/// `tokens_k * price_per_million / 1_000_000` summed across categories
/// (§4.6 step 2). `cache_write` tokens ride on `cache_creation_tokens`.
pub fn compute_cost(usage: &Usage, prices: &PriceTable) -> CostBreakdown {
    let category = |tokens: u32, price: Option<f64>| {
        tokens as f64 * price.unwrap_or(0.0) / 1_000_000.0
    };

    CostBreakdown {
        input: category(usage.input_tokens, prices.input),
        output: category(usage.output_tokens, prices.output),
        cache_read: category(usage.cache_read_tokens, prices.cache_read),
        cache_write: category(usage.cache_creation_tokens, prices.cache_write),
    }
}
