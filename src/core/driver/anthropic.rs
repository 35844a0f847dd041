//! Anthropic-style driver (§4.4.a): a vendor-SDK-shaped streaming client
//! that accumulates `content_block_delta` events into a canonical
//! [`Response`], honouring prompt caching and transcript repair.

use crate::core::driver::{Driver, DriverOps, DeltaCallback, StreamOptions};
use crate::core::stream::ResponseAccumulator;
use crate::core::transcript;
use crate::core::types::config::ProviderConfig;
use crate::core::types::context::RequestContext;
use crate::core::types::message::{ContentBlock, Message, Role, ToolDefinition};
use crate::core::types::response::{Response, StopReason, Usage};
use crate::error::{enhance_error, GatewayError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;

/// Request body shape sent to the Anthropic Messages API.
#[derive(Debug, Clone)]
struct AnthropicRequest {
    model: String,
    system: Option<Value>,
    messages: Vec<Value>,
    tools: Vec<Value>,
    max_tokens: u32,
    thinking: Option<Value>,
}

#[derive(Debug)]
pub struct AnthropicDriver {
    alias: String,
    model: String,
    config: ProviderConfig,
    client: reqwest::Client,
    /// HTTP transport base; `None` uses the vendor default endpoint.
    base_url: Option<String>,
}

impl AnthropicDriver {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            alias: alias.into(),
            model: model.into(),
            base_url: config.base_url.clone(),
            config,
            client,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/messages",
            self.base_url.as_deref().unwrap_or("https://api.anthropic.com")
        )
    }

    /// Convert the provider-agnostic transcript into Anthropic's message
    /// shape, after repairing orphaned tool pairs (§4.2, §4.4.a).
    fn build_request(
        &self,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
        system_prompt: &str,
        opts: &StreamOptions<'_>,
    ) -> AnthropicRequest {
        let (repaired, _stats) = transcript::repair(messages.to_vec());

        let mut wire_messages = Vec::with_capacity(repaired.len());
        for message in &repaired {
            if message.is_empty_user_turn() {
                continue;
            }
            wire_messages.push(self.message_to_wire(message));
        }

        let system = if self.config.prompt_caching && !system_prompt.is_empty() {
            Some(json!([{
                "type": "text",
                "text": system_prompt,
                "cache_control": {"type": "ephemeral"},
            }]))
        } else if !system_prompt.is_empty() {
            Some(json!(system_prompt))
        } else {
            None
        };

        let tools = tool_defs
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();

        let thinking = if opts.thinking_level.is_off() {
            None
        } else {
            let budget = opts
                .thinking_budget
                .unwrap_or_else(|| opts.thinking_level.anthropic_budget());
            Some(json!({"type": "enabled", "budget_tokens": budget}))
        };

        AnthropicRequest {
            model: self.model.clone(),
            system,
            messages: wire_messages,
            tools,
            max_tokens: self.config.max_tokens.unwrap_or(4096),
            thinking,
        }
    }

    fn message_to_wire(&self, message: &Message) -> Value {
        match message.role {
            Role::User => {
                let mut parts = Vec::new();
                if !message.content.is_empty() {
                    parts.push(json!({"type": "text", "text": message.content}));
                }
                if let Some(blocks) = &message.content_blocks {
                    for block in blocks {
                        if let ContentBlock::Image { mime_type, data } = block {
                            parts.push(json!({
                                "type": "image",
                                "source": {"type": "base64", "media_type": mime_type, "data": data},
                            }));
                        }
                    }
                }
                json!({"role": "user", "content": parts})
            }
            Role::Assistant => json!({"role": "assistant", "content": message.content}),
            Role::ToolUse => json!({
                "role": "assistant",
                "content": [{
                    "type": "tool_use",
                    "id": message.tool_use_id,
                    "name": message.tool_name,
                    "input": message.tool_input.clone().unwrap_or(Value::Null),
                }],
            }),
            Role::ToolResult => json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": message.tool_use_id,
                    "content": message.content,
                    "is_error": message.is_error,
                }],
            }),
            Role::System => json!({"role": "user", "content": message.content}),
        }
    }

    fn map_stop_reason(raw: &str) -> StopReason {
        match raw {
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }
}

#[async_trait]
impl DriverOps for AnthropicDriver {
    fn name(&self) -> &str {
        &self.alias
    }

    fn driver_type(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn metadata_provider(&self) -> &str {
        self.config.subtype.as_deref().unwrap_or("anthropic")
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens.unwrap_or(4096)
    }

    fn context_tokens(&self) -> u32 {
        self.config.context_tokens.unwrap_or(200_000)
    }

    fn with_model(&self, model: &str) -> Driver {
        Driver::Anthropic(AnthropicDriver::new(self.alias.clone(), model, self.config.clone()))
    }

    fn with_max_tokens(&self, max_tokens: u32) -> Driver {
        let mut config = self.config.clone();
        config.max_tokens = Some(max_tokens);
        Driver::Anthropic(AnthropicDriver::new(self.alias.clone(), self.model.clone(), config))
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
        let request = self.build_request(messages, tool_defs, system_prompt, &opts);

        let body = json!({
            "model": request.model,
            "system": request.system,
            "messages": request.messages,
            "tools": request.tools,
            "max_tokens": request.max_tokens,
            "thinking": request.thinking,
            "stream": true,
        });

        let api_key = self.config.api_key.clone().unwrap_or_default();
        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(enhance_error(
                GatewayError::from_text(format!("anthropic http {status}: {text}")),
                &text,
            ));
        }

        let bytes = response.bytes().await?;
        let accumulator = Mutex::new(ResponseAccumulator::new());
        let mut cache_read = 0u32;
        let mut cache_write = 0u32;

        let mut parser = crate::core::stream::sse::SseParser::new();
        for event in parser.push(&bytes) {
            if crate::core::stream::sse::SseParser::is_done_marker(&event) {
                break;
            }
            if event.data.is_empty() {
                continue;
            }
            let parsed: Value = match serde_json::from_str(&event.data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let kind = parsed.get("type").and_then(Value::as_str).unwrap_or("");
            let mut acc = accumulator.lock().expect("accumulator mutex is never poisoned");
            match kind {
                "content_block_delta" => {
                    if let Some(text) = parsed.pointer("/delta/text").and_then(Value::as_str) {
                        acc.push_text(text);
                        on_delta(text);
                    }
                    if let Some(thinking) = parsed.pointer("/delta/thinking").and_then(Value::as_str) {
                        acc.push_thinking(thinking);
                    }
                }
                "content_block_stop" => {
                    if let Some(block) = parsed.get("content_block") {
                        if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                            let id = block.get("id").and_then(Value::as_str).unwrap_or_default();
                            let name = block.get("name").and_then(Value::as_str).unwrap_or_default();
                            let input = block.get("input").cloned().unwrap_or(Value::Null);
                            acc.set_tool_call(id, name, input);
                        }
                    }
                }
                "message_delta" => {
                    if let Some(reason) = parsed.pointer("/delta/stop_reason").and_then(Value::as_str) {
                        acc.set_stop_reason(Self::map_stop_reason(reason));
                    }
                    if let Some(usage) = parsed.get("usage") {
                        cache_read = usage
                            .get("cache_read_input_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32;
                        cache_write = usage
                            .get("cache_creation_input_tokens")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as u32;
                        let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
                        acc.merge_usage(Usage {
                            input_tokens: 0,
                            output_tokens: output,
                            cache_creation_tokens: cache_write,
                            cache_read_tokens: cache_read,
                            reasoning_tokens: 0,
                        });
                    }
                }
                "message_start" => {
                    if let Some(usage) = parsed.pointer("/message/usage") {
                        let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32;
                        acc.merge_usage(Usage {
                            input_tokens: input,
                            ..Usage::default()
                        });
                    }
                }
                _ => {}
            }
        }

        if ctx.cancellation.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let accumulator = accumulator.into_inner().expect("accumulator mutex is never poisoned");
        Ok(accumulator.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::config::DriverKind;

    fn driver() -> AnthropicDriver {
        AnthropicDriver::new(
            "anthropic",
            "claude-opus-4.5",
            ProviderConfig {
                driver: DriverKind::Anthropic,
                subtype: None,
                api_key: Some("sk-test".into()),
                base_url: None,
                url: None,
                max_tokens: Some(4096),
                context_tokens: Some(200_000),
                timeout_seconds: 120,
                prompt_caching: true,
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
            },
        )
    }

    #[test]
    fn prompt_caching_marks_system_block_cacheable() {
        let driver = driver();
        let request = driver.build_request(&[], &[], "be helpful", &StreamOptions::default());
        let system = request.system.unwrap();
        assert_eq!(system[0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn orphan_tool_use_is_textualised_before_wire_conversion() {
        let driver = driver();
        let messages = vec![Message::tool_use("T1", "search", serde_json::json!({"q": "x"}))];
        let request = driver.build_request(&messages, &[], "", &StreamOptions::default());
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0]["role"], "assistant");
    }

    #[test]
    fn with_model_preserves_alias_and_config() {
        let driver = driver();
        let clone = driver.with_model("claude-haiku");
        assert_eq!(clone.model(), "claude-haiku");
        assert_eq!(clone.name(), "anthropic");
    }
}
