//! Token/duration/outcome counters under the `llm/<type>/<name>/<model>`
//! metric prefix, plus `purpose/<name>` aggregates (§4.6 steps 3-4).

use crate::core::cost::CostBreakdown;
use crate::core::types::response::{Response, StopReason};
use std::time::Duration;

#[cfg(feature = "metrics")]
use prometheus::{CounterVec, GaugeVec, HistogramVec, Opts, Registry};

/// Everything needed to label one call's metrics.
pub struct CallLabels<'a> {
    pub driver_type: &'a str,
    pub alias: &'a str,
    pub model: &'a str,
    pub purpose: Option<&'a str>,
}

impl CallLabels<'_> {
    fn metric_prefix(&self) -> String {
        format!("llm/{}/{}/{}", self.driver_type, self.alias, self.model)
    }
}

/// Emits metrics for completed calls. Without the `metrics` feature this
/// is a no-op sink so callers don't need to conditionally compile their
/// call sites (§4.6).
pub struct MetricsEmitter {
    #[cfg(feature = "metrics")]
    inner: PrometheusEmitter,
}

impl Default for MetricsEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsEmitter {
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            inner: PrometheusEmitter::new(),
        }
    }

    #[cfg(feature = "metrics")]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record one completed call: token counters, duration, stop reason,
    /// request outcome, context-window usage, and cost (§4.6 step 3), plus
    /// per-purpose aggregates when the call context carries one (step 4).
    pub fn record_call(
        &self,
        labels: &CallLabels<'_>,
        response: &Response,
        cost: &CostBreakdown,
        duration: Duration,
        success: bool,
        context_tokens: Option<u32>,
    ) {
        #[cfg(feature = "metrics")]
        self.inner
            .record_call(labels, response, cost, duration, success, context_tokens);

        #[cfg(not(feature = "metrics"))]
        {
            let _ = (labels, response, cost, duration, success, context_tokens);
        }
    }
}

#[cfg(feature = "metrics")]
struct PrometheusEmitter {
    registry: Registry,
    input_tokens: CounterVec,
    output_tokens: CounterVec,
    cache_read_tokens: CounterVec,
    reasoning_tokens: CounterVec,
    request_duration: HistogramVec,
    request_status: CounterVec,
    stop_reason: CounterVec,
    context_usage_percent: GaugeVec,
    cost_micro_usd: CounterVec,
    purpose_requests: CounterVec,
    purpose_cost_micro_usd: CounterVec,
}

#[cfg(feature = "metrics")]
impl PrometheusEmitter {
    fn new() -> Self {
        let registry = Registry::new();

        let counter_vec = |name: &str, help: &str, label_names: &[&str]| {
            let vec = CounterVec::new(Opts::new(name, help), label_names)
                .expect("static metric definitions are well-formed");
            registry
                .register(Box::new(vec.clone()))
                .expect("metric names are unique within this registry");
            vec
        };

        let prefix_labels = ["driver_type", "alias", "model"];

        let emitter = Self {
            input_tokens: counter_vec(
                "llm_input_tokens_total",
                "Input tokens consumed per driver/alias/model",
                &prefix_labels,
            ),
            output_tokens: counter_vec(
                "llm_output_tokens_total",
                "Output tokens produced per driver/alias/model",
                &prefix_labels,
            ),
            cache_read_tokens: counter_vec(
                "llm_cache_read_tokens_total",
                "Cache-read tokens per driver/alias/model",
                &prefix_labels,
            ),
            reasoning_tokens: counter_vec(
                "llm_reasoning_tokens_total",
                "Reasoning tokens per driver/alias/model",
                &prefix_labels,
            ),
            request_duration: HistogramVec::new(
                prometheus::HistogramOpts::new(
                    "llm_request_duration_seconds",
                    "Call duration per driver/alias/model",
                ),
                &prefix_labels,
            )
            .expect("static metric definitions are well-formed"),
            request_status: counter_vec(
                "llm_request_status_total",
                "Request outcomes per driver/alias/model/status",
                &["driver_type", "alias", "model", "status"],
            ),
            stop_reason: counter_vec(
                "llm_stop_reason_total",
                "Stop reasons per driver/alias/model/reason",
                &["driver_type", "alias", "model", "reason"],
            ),
            context_usage_percent: GaugeVec::new(
                Opts::new(
                    "llm_context_usage_percent",
                    "Context window usage percent per driver/alias/model",
                ),
                &prefix_labels,
            )
            .expect("static metric definitions are well-formed"),
            cost_micro_usd: counter_vec(
                "llm_cost_micro_usd_total",
                "Cost in micro-USD per driver/alias/model",
                &prefix_labels,
            ),
            purpose_requests: counter_vec(
                "llm_purpose_requests_total",
                "Requests per purpose",
                &["purpose"],
            ),
            purpose_cost_micro_usd: counter_vec(
                "llm_purpose_cost_micro_usd_total",
                "Cost in micro-USD per purpose",
                &["purpose"],
            ),
        };

        registry
            .register(Box::new(emitter.request_duration.clone()))
            .expect("metric names are unique within this registry");
        registry
            .register(Box::new(emitter.context_usage_percent.clone()))
            .expect("metric names are unique within this registry");

        emitter
    }

    fn record_call(
        &self,
        labels: &CallLabels<'_>,
        response: &Response,
        cost: &CostBreakdown,
        duration: Duration,
        success: bool,
        context_tokens: Option<u32>,
    ) {
        let prefix = [labels.driver_type, labels.alias, labels.model];

        self.input_tokens
            .with_label_values(&prefix)
            .inc_by(response.usage.input_tokens as f64);
        self.output_tokens
            .with_label_values(&prefix)
            .inc_by(response.usage.output_tokens as f64);
        self.cache_read_tokens
            .with_label_values(&prefix)
            .inc_by(response.usage.cache_read_tokens as f64);
        self.reasoning_tokens
            .with_label_values(&prefix)
            .inc_by(response.usage.reasoning_tokens as f64);

        self.request_duration
            .with_label_values(&prefix)
            .observe(duration.as_secs_f64());

        let status = if success { "success" } else { "failure" };
        self.request_status
            .with_label_values(&[labels.driver_type, labels.alias, labels.model, status])
            .inc();

        let reason = stop_reason_label(response.stop_reason.0);
        self.stop_reason
            .with_label_values(&[labels.driver_type, labels.alias, labels.model, reason])
            .inc();

        if let Some(context_tokens) = context_tokens.filter(|tokens| *tokens > 0) {
            let used = response.usage.input_tokens + response.usage.output_tokens;
            let percent = used as f64 / context_tokens as f64 * 100.0;
            self.context_usage_percent
                .with_label_values(&prefix)
                .set(percent);
        }

        let cost_micro_usd = cost.total() * 1_000_000.0;
        self.cost_micro_usd
            .with_label_values(&prefix)
            .inc_by(cost_micro_usd.max(0.0));

        if let Some(purpose) = labels.purpose {
            self.purpose_requests.with_label_values(&[purpose]).inc();
            self.purpose_cost_micro_usd
                .with_label_values(&[purpose])
                .inc_by(cost_micro_usd.max(0.0));
        }
    }
}

#[cfg(feature = "metrics")]
fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::EndTurn => "end_turn",
        StopReason::ToolUse => "tool_use",
        StopReason::MaxTokens => "max_tokens",
    }
}
