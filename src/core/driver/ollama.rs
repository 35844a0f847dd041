//! Ollama driver (§4.4.c): a local-daemon transport using `/api/chat` for
//! conversational turns and `/api/embeddings` for the embeddings-only mode.
//! Context length is learned once per model via `/api/show` rather than
//! configured, since local installs routinely swap quantizations.

use crate::core::driver::{CapabilitiesProbe, Driver, DriverOps, DeltaCallback, ModelValidation, ModelValidator, StreamOptions};
use crate::core::stream::ResponseAccumulator;
use crate::core::transcript;
use crate::core::types::config::ProviderConfig;
use crate::core::types::context::RequestContext;
use crate::core::types::message::{Message, Role, ToolDefinition};
use crate::core::types::response::{Response, StopReason, Usage};
use crate::error::{enhance_error, GatewayError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Process-wide cache of `/api/show`-reported context lengths, keyed by
/// model, learned on first bind rather than re-queried per call (§4.4.c).
static CONTEXT_LENGTH_CACHE: Lazy<RwLock<HashMap<String, u32>>> = Lazy::new(|| RwLock::new(HashMap::new()));

const DEFAULT_CONTEXT_TOKENS: u32 = 4096;

/// Truncate oversized input to roughly 80% of the model's byte budget,
/// cutting at the last full sentence and appending a marker so the model
/// knows the input was shortened (§4.4.c).
fn truncate_input(text: &str, context_tokens: u32) -> String {
    let byte_budget = (context_tokens as usize * 3 * 80) / 100;
    if text.len() <= byte_budget {
        return text.to_string();
    }
    let mut cut = crate::utils::truncate_string(text, byte_budget);
    if let Some(last_period) = cut.rfind(['.', '!', '?']) {
        cut.truncate(last_period + 1);
    }
    format!("{cut}\n[... input truncated to fit context window ...]")
}

#[derive(Debug)]
pub struct OllamaDriver {
    alias: String,
    model: String,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OllamaDriver {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            alias: alias.into(),
            model: model.into(),
            config,
            client,
        }
    }

    fn base_url(&self) -> String {
        self.config
            .url
            .clone()
            .or_else(|| self.config.base_url.clone())
            .unwrap_or_else(|| "http://localhost:11434".to_string())
    }

    fn learned_context_tokens(&self) -> u32 {
        self.config.context_tokens.unwrap_or_else(|| {
            CONTEXT_LENGTH_CACHE
                .read()
                .get(&self.model)
                .copied()
                .unwrap_or(DEFAULT_CONTEXT_TOKENS)
        })
    }

    fn build_messages(&self, messages: &[Message], system_prompt: &str) -> Vec<Value> {
        let (repaired, _stats) = transcript::repair(messages.to_vec());
        let context_tokens = self.learned_context_tokens();
        let mut wire = Vec::with_capacity(repaired.len() + 1);

        if !system_prompt.is_empty() {
            wire.push(json!({"role": "system", "content": system_prompt}));
        }

        for message in repaired {
            if message.is_empty_user_turn() {
                continue;
            }
            match message.role {
                Role::User => {
                    let content = truncate_input(&message.content, context_tokens);
                    wire.push(json!({"role": "user", "content": content}));
                }
                Role::System => wire.push(json!({"role": "system", "content": message.content})),
                Role::Assistant => wire.push(json!({"role": "assistant", "content": message.content})),
                Role::ToolUse => wire.push(json!({
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "function": {
                            "name": message.tool_name,
                            "arguments": message.tool_input.clone().unwrap_or(Value::Null),
                        },
                    }],
                })),
                Role::ToolResult => wire.push(json!({"role": "tool", "content": message.content})),
            }
        }

        wire
    }

    async fn fetch_context_length(&self, ctx: &RequestContext) -> Option<u32> {
        let _ = ctx;
        let response = self
            .client
            .post(format!("{}/api/show", self.base_url()))
            .json(&json!({"model": self.model}))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        let info = body.get("model_info")?.as_object()?;
        info.iter()
            .find(|(key, _)| key.ends_with(".context_length"))
            .and_then(|(_, value)| value.as_u64())
            .map(|v| v as u32)
    }
}

#[async_trait]
impl DriverOps for OllamaDriver {
    fn name(&self) -> &str {
        &self.alias
    }

    fn driver_type(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn metadata_provider(&self) -> &str {
        "ollama"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens.unwrap_or(4096)
    }

    fn context_tokens(&self) -> u32 {
        self.learned_context_tokens()
    }

    fn with_model(&self, model: &str) -> Driver {
        Driver::Ollama(OllamaDriver::new(self.alias.clone(), model, self.config.clone()))
    }

    fn with_max_tokens(&self, max_tokens: u32) -> Driver {
        let mut config = self.config.clone();
        config.max_tokens = Some(max_tokens);
        Driver::Ollama(OllamaDriver::new(self.alias.clone(), self.model.clone(), config))
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
        system_prompt: &str,
        on_delta: DeltaCallback<'_>,
        _opts: StreamOptions<'_>,
    ) -> Result<Response> {
        if !CONTEXT_LENGTH_CACHE.read().contains_key(&self.model) {
            if let Some(context_length) = self.fetch_context_length(ctx).await {
                CONTEXT_LENGTH_CACHE.write().insert(self.model.clone(), context_length);
            }
        }

        let mut body = json!({
            "model": self.model,
            "messages": self.build_messages(messages, system_prompt),
            "stream": false,
        });
        if !tool_defs.is_empty() {
            body["tools"] = json!(tool_defs
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                }))
                .collect::<Vec<_>>());
        }

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(enhance_error(
                GatewayError::from_text(format!("ollama http {status}: {text}")),
                &text,
            ));
        }

        let parsed: Value = response.json().await?;
        let mut accumulator = ResponseAccumulator::new();

        if let Some(content) = parsed.pointer("/message/content").and_then(Value::as_str) {
            if !content.is_empty() {
                accumulator.push_text(content);
                on_delta(content);
            }
        }
        if let Some(calls) = parsed.pointer("/message/tool_calls").and_then(Value::as_array) {
            for call in calls {
                let name = call.pointer("/function/name").and_then(Value::as_str).unwrap_or_default();
                let input = call.pointer("/function/arguments").cloned().unwrap_or(Value::Null);
                accumulator.set_tool_call(format!("ollama-{name}"), name, input);
            }
        }
        accumulator.set_stop_reason(if accumulator.dropped_tool_calls() > 0 || parsed.pointer("/message/tool_calls").is_some() {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        });
        accumulator.merge_usage(Usage {
            input_tokens: parsed.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0) as u32,
            output_tokens: parsed.get("eval_count").and_then(Value::as_u64).unwrap_or(0) as u32,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
            reasoning_tokens: 0,
        });

        if ctx.cancellation.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        Ok(accumulator.finish())
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    async fn embed(&self, _ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url()))
            .json(&json!({"model": self.model, "prompt": text}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(enhance_error(
                GatewayError::from_text(format!("ollama http {status}: {text}")),
                &text,
            ));
        }

        let parsed: Value = response.json().await?;
        let embedding = parsed
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::from_text("ollama embeddings response missing 'embedding' field"))?;
        Ok(embedding.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
    }
}

impl ModelValidator for OllamaDriver {
    /// Ollama has no server-enforced model allowlist; validation is purely
    /// advisory — a locally unpulled model surfaces as a connection-refused
    /// or 404 at call time rather than here.
    fn validate_model(&self, model: &str) -> Option<ModelValidation> {
        if model.trim().is_empty() {
            return Some(ModelValidation {
                fatal: true,
                message: "model name must not be empty".to_string(),
            });
        }
        None
    }
}

#[async_trait]
impl CapabilitiesProbe for OllamaDriver {
    async fn list_models(&self, _ctx: &RequestContext) -> Result<Vec<String>> {
        let response = self.client.get(format!("{}/api/tags", self.base_url())).send().await?;
        let parsed: Value = response.json().await?;
        let models = parsed
            .get("models")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn test_connection(&self, ctx: &RequestContext) -> Result<()> {
        if self.config.embedding_only {
            self.embed(ctx, "connection probe").await?;
        } else {
            self.simple(ctx, "ping", "").await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::config::DriverKind;

    fn config() -> ProviderConfig {
        ProviderConfig {
            driver: DriverKind::Ollama,
            subtype: None,
            api_key: None,
            base_url: None,
            url: Some("http://localhost:11434".into()),
            max_tokens: Some(4096),
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

    #[test]
    fn truncates_oversized_input_to_last_sentence() {
        let sentence = "This is one sentence. ".repeat(50);
        let truncated = truncate_input(&sentence, 100);
        assert!(truncated.len() < sentence.len());
        assert!(truncated.ends_with("[... input truncated to fit context window ...]"));
        assert!(truncated.contains("This is one sentence."));
    }

    #[test]
    fn leaves_small_input_untouched() {
        assert_eq!(truncate_input("hello", 4096), "hello");
    }

    #[test]
    fn rejects_empty_model_name() {
        let driver = OllamaDriver::new("ollama", "llama3", config());
        let validation = driver.validate_model("").unwrap();
        assert!(validation.fatal);
    }

    #[test]
    fn accepts_nonempty_model_name() {
        let driver = OllamaDriver::new("ollama", "llama3", config());
        assert!(driver.validate_model("llama3").is_none());
    }
}
