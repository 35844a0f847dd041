//! OpenAI-compatible driver (§4.4.b): targets any backend speaking the
//! Chat Completions dialect, including self-hosted endpoints, OpenRouter,
//! and Kimi. Hand-parses its own SSE stream (§6) since reasoning payloads
//! vary across OpenRouter-fronted models in ways the generic JSON body
//! doesn't capture uniformly.

use crate::core::driver::{Driver, DriverOps, DeltaCallback, StreamOptions};
use crate::core::stream::sse::SseParser;
use crate::core::stream::ResponseAccumulator;
use crate::core::transcript;
use crate::core::types::config::ProviderConfig;
use crate::core::types::context::RequestContext;
use crate::core::types::message::{Message, Role, ToolDefinition};
use crate::core::types::response::{Response, Usage};
use crate::error::{enhance_error, GatewayError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;

/// Process-wide, write-once cache of learned max-output-token limits, keyed
/// by model id (§4.4.b, §5: "write-once entries").
static LEARNED_MAX_TOKENS: Lazy<RwLock<HashMap<String, u32>>> = Lazy::new(|| RwLock::new(HashMap::new()));

/// Family-pattern fallback for context window size when no metadata
/// endpoint reports one (§4.4.b).
fn context_window_fallback(model: &str) -> u32 {
    let lower = model.to_lowercase();
    if lower.contains("claude") {
        200_000
    } else if lower.contains("kimi") {
        262_144
    } else if lower.contains("gpt-4-turbo") || lower.contains("gpt-4o") {
        128_000
    } else if lower.contains("gpt-4") {
        8_192
    } else if lower.contains("gpt-3.5") {
        16_384
    } else {
        4_096
    }
}

fn is_openrouter(base_url: &str) -> bool {
    base_url.contains("openrouter.ai")
}

#[derive(Debug)]
pub struct OpenAiCompatibleDriver {
    alias: String,
    model: String,
    config: ProviderConfig,
    client: reqwest::Client,
    context_tokens: u32,
    last_hang_warning: std::sync::Mutex<Option<Instant>>,
}

impl OpenAiCompatibleDriver {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, config: ProviderConfig) -> Self {
        let model = model.into();
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let context_tokens = config.context_tokens.unwrap_or_else(|| context_window_fallback(&model));
        Self {
            alias: alias.into(),
            model,
            config,
            client,
            context_tokens,
            last_hang_warning: std::sync::Mutex::new(None),
        }
    }

    fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string())
    }

    fn effective_max_tokens(&self) -> u32 {
        LEARNED_MAX_TOKENS
            .read()
            .get(&self.model)
            .copied()
            .unwrap_or_else(|| self.config.max_tokens.unwrap_or(4096))
    }

    /// Coalesce a repaired transcript into Chat-Completions messages:
    /// `tool_use`/`tool_result` pairs become an assistant `tool_calls`
    /// entry plus a `tool` role message (§4.4.b).
    fn build_messages(&self, messages: &[Message], system_prompt: &str) -> Vec<Value> {
        let (repaired, _stats) = transcript::repair(messages.to_vec());
        let mut wire = Vec::with_capacity(repaired.len() + 1);

        if !system_prompt.is_empty() {
            wire.push(json!({"role": "system", "content": system_prompt}));
        }

        for message in repaired {
            match message.role {
                Role::User => {
                    if message.is_empty_user_turn() {
                        continue;
                    }
                    wire.push(json!({"role": "user", "content": message.content}));
                }
                Role::System => wire.push(json!({"role": "system", "content": message.content})),
                Role::Assistant => wire.push(json!({"role": "assistant", "content": message.content})),
                Role::ToolUse => {
                    wire.push(json!({
                        "role": "assistant",
                        "content": Value::Null,
                        "tool_calls": [{
                            "id": message.tool_use_id,
                            "type": "function",
                            "function": {
                                "name": message.tool_name,
                                "arguments": message.tool_input.clone().unwrap_or(Value::Null).to_string(),
                            },
                        }],
                    }));
                }
                Role::ToolResult => {
                    wire.push(json!({
                        "role": "tool",
                        "tool_call_id": message.tool_use_id,
                        "content": message.content,
                    }));
                }
            }
        }

        wire
    }

    fn build_body(&self, messages: &[Message], tool_defs: &[ToolDefinition], system_prompt: &str, opts: &StreamOptions<'_>, max_tokens: u32) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.build_messages(messages, system_prompt),
            "max_tokens": max_tokens,
            "stream": true,
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

        // Reasoning injection: OpenRouter-style endpoints accept a
        // `reasoning.effort` field the wrapping transport adds (§4.4.b).
        if is_openrouter(&self.base_url()) {
            if let Some(effort) = opts.thinking_level.openai_effort() {
                body["reasoning"] = json!({"effort": effort});
            }
        }

        body
    }

    async fn post_stream(&self, body: &Value) -> std::result::Result<reqwest::Response, GatewayError> {
        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url()))
            .json(body);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        if is_openrouter(&self.base_url()) {
            request = request
                .header("HTTP-Referer", "https://github.com/")
                .header("X-Title", "llm-gateway-core");
        }

        Ok(request.send().await?)
    }

    fn warn_if_hung(&self, last_content: &mut Instant) {
        if last_content.elapsed().as_secs() >= 60 {
            let mut guard = self.last_hang_warning.lock().expect("mutex is never poisoned");
            let should_warn = guard.map(|t| t.elapsed().as_secs() >= 60).unwrap_or(true);
            if should_warn {
                tracing::warn!(model = %self.model, "stream idle for 60s with no content delta; backend may be reasoning");
                *guard = Some(Instant::now());
            }
            *last_content = Instant::now();
        }
    }
}

#[async_trait]
impl DriverOps for OpenAiCompatibleDriver {
    fn name(&self) -> &str {
        &self.alias
    }

    fn driver_type(&self) -> &'static str {
        "openai_compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn metadata_provider(&self) -> &str {
        self.config.subtype.as_deref().unwrap_or("openai")
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some() || self.config.base_url.is_some()
    }

    fn max_tokens(&self) -> u32 {
        self.effective_max_tokens()
    }

    fn context_tokens(&self) -> u32 {
        self.context_tokens
    }

    fn with_model(&self, model: &str) -> Driver {
        Driver::OpenaiCompatible(OpenAiCompatibleDriver::new(self.alias.clone(), model, self.config.clone()))
    }

    fn with_max_tokens(&self, max_tokens: u32) -> Driver {
        let mut config = self.config.clone();
        config.max_tokens = Some(max_tokens);
        Driver::OpenaiCompatible(OpenAiCompatibleDriver::new(self.alias.clone(), self.model.clone(), config))
    }

    async fn stream(
        &self,
        ctx: &RequestContext,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
        system_prompt: &str,
        on_delta: DeltaCallback<'_>,
        opts: StreamOptions<'_>,
    ) -> Result<Response> {
        let max_tokens = self.effective_max_tokens();
        let body = self.build_body(messages, tool_defs, system_prompt, &opts, max_tokens);
        let response = self.post_stream(&body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            let (is_max_tokens, limit) = crate::error::parse_max_tokens_limit(&text);
            if is_max_tokens && limit > 0 && limit < max_tokens {
                LEARNED_MAX_TOKENS.write().insert(self.model.clone(), limit);
                let retry_body = self.build_body(messages, tool_defs, system_prompt, &opts, limit);
                let retry_response = self.post_stream(&retry_body).await?;
                if retry_response.status().is_success() {
                    return self.read_sse(ctx, retry_response, on_delta).await;
                }
            }

            return Err(enhance_error(
                GatewayError::from_text(format!("openai-compatible http {status}: {text}")),
                &text,
            ));
        }

        self.read_sse(ctx, response, on_delta).await
    }
}

impl OpenAiCompatibleDriver {
    async fn read_sse(&self, ctx: &RequestContext, response: reqwest::Response, on_delta: DeltaCallback<'_>) -> Result<Response> {
        let mut accumulator = ResponseAccumulator::new();
        let mut parser = SseParser::new();
        let mut last_content = Instant::now();

        let bytes = response.bytes().await?;
        for event in parser.push(&bytes) {
            if SseParser::is_done_marker(&event) {
                break;
            }
            if event.data.is_empty() {
                continue;
            }
            let parsed: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let choice = parsed.pointer("/choices/0");
            let Some(choice) = choice else { continue };

            if let Some(content) = choice.pointer("/delta/content").and_then(Value::as_str) {
                if !content.is_empty() {
                    accumulator.push_text(content);
                    on_delta(content);
                    last_content = Instant::now();
                }
            }
            if let Some(reasoning) = choice.pointer("/delta/reasoning_content").and_then(Value::as_str) {
                accumulator.push_thinking(reasoning);
            }
            if let Some(details) = choice.pointer("/delta/reasoning_details").and_then(Value::as_array) {
                for detail in details {
                    if let Some(text) = detail.get("text").and_then(Value::as_str) {
                        accumulator.push_thinking(text);
                    }
                }
            }
            if let Some(tool_calls) = choice.pointer("/delta/tool_calls").and_then(Value::as_array) {
                for call in tool_calls {
                    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                    let name = call.pointer("/function/name").and_then(Value::as_str).unwrap_or_default();
                    let arguments = call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    let input = serde_json::from_str(arguments).unwrap_or(Value::Null);
                    accumulator.set_tool_call(id, name, input);
                }
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                accumulator.set_stop_reason(ResponseAccumulator::map_stop_reason(reason));
            }
            if let Some(usage) = parsed.get("usage") {
                accumulator.merge_usage(Usage {
                    input_tokens: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                    output_tokens: usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                    cache_creation_tokens: 0,
                    cache_read_tokens: usage
                        .pointer("/prompt_tokens_details/cached_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                    reasoning_tokens: usage
                        .pointer("/completion_tokens_details/reasoning_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0) as u32,
                });
            }

            self.warn_if_hung(&mut last_content);
        }

        if ctx.cancellation.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        Ok(accumulator.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::config::DriverKind;

    fn config(base_url: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            driver: DriverKind::OpenaiCompatible,
            subtype: None,
            api_key: Some("key".into()),
            base_url: base_url.map(str::to_string),
            url: None,
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
    fn context_window_fallback_matches_family_table() {
        assert_eq!(context_window_fallback("claude-3-via-proxy"), 200_000);
        assert_eq!(context_window_fallback("kimi-k2"), 262_144);
        assert_eq!(context_window_fallback("gpt-4o"), 128_000);
        assert_eq!(context_window_fallback("gpt-4"), 8_192);
        assert_eq!(context_window_fallback("gpt-3.5-turbo"), 16_384);
        assert_eq!(context_window_fallback("some-unknown-model"), 4_096);
    }

    #[test]
    fn reasoning_injected_only_for_openrouter_base_url() {
        let driver = OpenAiCompatibleDriver::new("or", "gpt-5", config(Some("https://openrouter.ai/api")));
        let mut opts = StreamOptions::default();
        opts.thinking_level = crate::core::thinking::ThinkingLevel::High;
        let body = driver.build_body(&[], &[], "", &opts, 4096);
        assert_eq!(body["reasoning"]["effort"], "high");

        let driver = OpenAiCompatibleDriver::new("direct", "gpt-5", config(Some("https://api.openai.com")));
        let body = driver.build_body(&[], &[], "", &opts, 4096);
        assert!(body.get("reasoning").is_none());
    }

    #[test]
    fn tool_use_result_pair_becomes_assistant_and_tool_messages() {
        let driver = OpenAiCompatibleDriver::new("or", "gpt-5", config(None));
        let messages = vec![
            Message::tool_use("T1", "search", json!({"q": "x"})),
            Message::tool_result("T1", "result text"),
        ];
        let wire = driver.build_messages(&messages, "");
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["tool_calls"][0]["function"]["name"], "search");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "T1");
    }
}
