//! Failover Engine (§4.9 "At call time"): walks a purpose's candidate chain
//! with cooldown gating, per-attempt session state load/save, and recovery
//! detection.

use crate::core::driver::{DeltaCallback, StreamOptions};
use crate::core::router::registry::Registry;
use crate::core::session::{session_key, ProviderStateAccessor};
use crate::core::thinking::ThinkingLevel;
use crate::core::types::context::RequestContext;
use crate::core::types::message::{Message, ToolDefinition};
use crate::core::types::response::Response;
use crate::error::{is_failover, classify, ErrorKind, GatewayError, Result};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// One candidate's disposition during a call-time walk (§8 scenarios 1-2).
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub reference: String,
    pub skipped: bool,
    pub error_kind: Option<ErrorKind>,
}

/// The result of a successful Failover Engine call, carrying enough detail
/// for the caller to attribute cost/metrics and log recovery (§4.9, §8).
#[derive(Debug)]
pub struct CallOutcome {
    pub response: Response,
    pub attempts: Vec<Attempt>,
    pub model_used: String,
    pub failed_over: bool,
    pub recovered_alias: Option<String>,
}

/// Walks a purpose's gated chain, consulting the [`Registry`]'s cooldown map
/// and optional session accessor around each attempt.
pub struct FailoverEngine {
    registry: Arc<Registry>,
    session_accessor: Option<Arc<dyn ProviderStateAccessor>>,
}

impl std::fmt::Debug for FailoverEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverEngine")
            .field("registry", &self.registry)
            .field("has_session_accessor", &self.session_accessor.is_some())
            .finish()
    }
}

impl FailoverEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            session_accessor: None,
        }
    }

    pub fn with_session_accessor(mut self, accessor: Arc<dyn ProviderStateAccessor>) -> Self {
        self.session_accessor = Some(accessor);
        self
    }

    /// Candidates = purpose.models ∪ agent.models, agent appended last
    /// unless `purpose == "agent"` or the agent chain is empty, duplicates
    /// suppressed (§4.9 step 1).
    fn candidates(&self, purpose: &str) -> Vec<String> {
        let mut candidates = self.registry.purpose_chain(purpose);
        if purpose != "agent" {
            for reference in self.registry.agent_chain() {
                if !candidates.contains(&reference) {
                    candidates.push(reference);
                }
            }
        }
        candidates
    }

    /// Run a streaming call for `purpose`, returning the full attempt trail
    /// alongside the response (§4.9 "At call time").
    ///
    /// `on_thinking_delta`/`on_server_tool_call` from the driver contract's
    /// `StreamOptions` aren't exposed at this layer — this engine forwards
    /// only the text delta callback and thinking controls across retries,
    /// since those two callbacks are neither `Clone` nor re-constructible
    /// once consumed by a failed attempt.
    pub async fn stream(
        &self,
        purpose: &str,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
        system_prompt: &str,
        mut on_delta: DeltaCallback<'_>,
        thinking_level: ThinkingLevel,
        thinking_budget: Option<u32>,
    ) -> Result<CallOutcome> {
        let candidates = self.candidates(purpose);
        debug!(purpose, candidates = ?candidates, "resolved failover candidate chain");
        let primary = candidates.first().cloned();
        let mut attempts = Vec::new();
        let mut last_error: Option<String> = None;

        for (attempt_index, reference) in candidates.iter().enumerate() {
            let Ok((alias, model)) = crate::core::router::resolver::parse_model_ref(reference) else {
                warn!(reference, "skipping malformed alias/model reference");
                attempts.push(Attempt {
                    reference: reference.clone(),
                    skipped: true,
                    error_kind: Some(ErrorKind::Format),
                });
                last_error = Some(format!("invalid model reference '{reference}'"));
                continue;
            };
            let _span = tracing::debug_span!("failover_attempt", purpose, alias, model, attempt = attempt_index).entered();

            let now = SystemTime::now();
            if self.registry.cooldowns.is_in_cooldown(alias, now) {
                debug!(alias, "alias is in cooldown, skipping without a network call");
                attempts.push(Attempt {
                    reference: reference.clone(),
                    skipped: true,
                    error_kind: None,
                });
                continue;
            }

            let Some(mut driver) = self.registry.resolve(alias, model) else {
                attempts.push(Attempt {
                    reference: reference.clone(),
                    skipped: true,
                    error_kind: None,
                });
                continue;
            };
            if !driver.is_available() {
                attempts.push(Attempt {
                    reference: reference.clone(),
                    skipped: true,
                    error_kind: None,
                });
                continue;
            }

            let key = session_key(alias, model);
            if let Some(accessor) = &self.session_accessor {
                if let Some(stateful) = driver.as_stateful_mut() {
                    if let Some(state) = accessor.get(&key) {
                        stateful.load_session_state(state);
                    }
                }
            }

            let ctx = RequestContext::for_purpose(purpose);
            let opts = StreamOptions {
                thinking_level,
                thinking_budget,
                on_thinking_delta: None,
                on_server_tool_call: None,
            };

            match driver
                .stream(&ctx, messages, tool_defs, system_prompt, &mut *on_delta, opts)
                .await
            {
                Ok(response) => {
                    if !ctx.cancellation.is_cancelled() {
                        if let Some(accessor) = &self.session_accessor {
                            if let Some(stateful) = driver.as_stateful_mut() {
                                accessor.set(&key, stateful.save_session_state());
                            }
                        }
                    }
                    let recovered = self.registry.cooldowns.clear(alias);
                    if recovered {
                        info!(alias, "alias recovered, cooldown cleared");
                    }
                    attempts.push(Attempt {
                        reference: reference.clone(),
                        skipped: false,
                        error_kind: None,
                    });
                    return Ok(CallOutcome {
                        response,
                        attempts,
                        model_used: reference.clone(),
                        failed_over: primary.as_deref() != Some(reference.as_str()),
                        recovered_alias: recovered.then(|| alias.to_string()),
                    });
                }
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) => {
                    if !ctx.cancellation.is_cancelled() {
                        if let Some(accessor) = &self.session_accessor {
                            if let Some(stateful) = driver.as_stateful_mut() {
                                accessor.set(&key, stateful.save_session_state());
                            }
                        }
                    }
                    let kind = err.kind().unwrap_or_else(|| classify(&err.to_string()));
                    warn!(alias, ?kind, "attempt failed");
                    attempts.push(Attempt {
                        reference: reference.clone(),
                        skipped: false,
                        error_kind: Some(kind),
                    });
                    last_error = Some(err.to_string());

                    if !is_failover(kind) {
                        return Err(err);
                    }
                    self.registry.cooldowns.record_failure(alias, kind, now);
                }
            }
        }

        Err(GatewayError::AllModelsFailed {
            purpose: purpose.to_string(),
            last: last_error.unwrap_or_else(|| "no candidates configured".to_string()),
        })
    }

    /// Non-streaming convenience wrapper, discarding deltas and returning
    /// the final accumulated [`Response`] the same way a streaming caller
    /// would see it at completion (mirrors
    /// [`DriverOps::simple`](crate::core::driver::DriverOps::simple)).
    pub async fn simple(&self, purpose: &str, user_text: &str, system_prompt: &str) -> Result<CallOutcome> {
        let messages = vec![Message::user(user_text)];
        let mut on_delta = |_delta: &str| {};
        self.stream(purpose, &messages, &[], system_prompt, &mut on_delta, ThinkingLevel::default(), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::config::{DriverKind, GatewayConfig, ProviderConfig, PurposeConfig, ThinkingConfigSection};
    use std::collections::HashMap;

    fn provider(driver: DriverKind) -> ProviderConfig {
        ProviderConfig {
            driver,
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
            cost_per_million_input: None,
            cost_per_million_output: None,
            cost_per_million_cache_read: None,
            cost_per_million_cache_write: None,
            trace: false,
            dump_on_success: false,
        }
    }

    fn registry() -> Arc<Registry> {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), provider(DriverKind::Anthropic));
        providers.insert("openai".to_string(), provider(DriverKind::OpenaiCompatible));
        let config = GatewayConfig {
            providers,
            agent: PurposeConfig {
                models: vec!["anthropic/claude-opus-4.5".to_string(), "openai/gpt-5".to_string()],
                max_input_tokens: None,
                auto_rebuild: None,
            },
            summarization: PurposeConfig::default(),
            embeddings: PurposeConfig::default(),
            thinking: ThinkingConfigSection::default(),
            system_prompt: String::new(),
            extra_purposes: HashMap::new(),
        };
        Arc::new(Registry::with_default_catalog(&config).unwrap())
    }

    #[test]
    fn agent_purpose_candidates_are_just_the_agent_chain() {
        let engine = FailoverEngine::new(registry());
        assert_eq!(engine.candidates("agent"), vec!["anthropic/claude-opus-4.5", "openai/gpt-5"]);
    }

    #[test]
    fn other_purposes_fall_back_to_agent_chain_appended_last() {
        let engine = FailoverEngine::new(registry());
        assert_eq!(engine.candidates("summarization"), vec!["anthropic/claude-opus-4.5", "openai/gpt-5"]);
    }

    #[test]
    fn primary_in_cooldown_is_recorded_as_skipped() {
        let registry = registry();
        registry.cooldowns.record_failure("anthropic", ErrorKind::Timeout, SystemTime::now());
        let engine = FailoverEngine::new(registry);
        // `candidates` alone doesn't consult cooldowns; the skip is asserted
        // against the cooldown map directly here since exercising the live
        // network path is out of scope for a unit test.
        assert!(engine.registry.cooldowns.is_in_cooldown("anthropic", SystemTime::now()));
    }
}
