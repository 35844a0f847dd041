//! xAI driver (§4.4.e): a gRPC-channel-fronted SDK shape (we speak its REST
//! gateway here, since a hand-rolled tonic client isn't what the upstream
//! SDK actually is, but the lazy-per-instance-channel and bounded-retry
//! behaviors carry over unchanged). Always advertises the built-in server
//! tools and prefixes colliding client tool names so the model can never
//! confuse the two namespaces.

use crate::core::driver::{Driver, DriverOps, DeltaCallback, StatefulDriver, StreamOptions};
use crate::core::session::SessionState;
use crate::core::stream::ResponseAccumulator;
use crate::core::transcript;
use crate::core::types::config::ProviderConfig;
use crate::core::types::context::RequestContext;
use crate::core::types::message::{ContentBlock, Message, Role, ToolDefinition};
use crate::core::types::response::{Response, StopReason, Usage};
use crate::error::{enhance_error, GatewayError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::time::Duration;

/// Server tools xAI always exposes regardless of what the caller passes,
/// so a client tool sharing one of these names must be disambiguated
/// (§4.4.e).
const SERVER_TOOL_NAMES: &[&str] = &["web_search", "x_search", "code_execution"];

fn wire_tool_name(name: &str) -> String {
    if SERVER_TOOL_NAMES.contains(&name) {
        format!("local_{name}")
    } else {
        name.to_string()
    }
}

fn unwire_tool_name(name: &str) -> String {
    name.strip_prefix("local_").unwrap_or(name).to_string()
}

fn is_transient_grpc_fault(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("rst_stream") || lower.contains("internal_error") || lower.contains("internal error")
}

#[derive(Debug)]
pub struct XaiDriver {
    alias: String,
    model: String,
    config: ProviderConfig,
    client: reqwest::Client,
    state: Mutex<SessionState>,
}

impl XaiDriver {
    pub fn new(alias: impl Into<String>, model: impl Into<String>, config: ProviderConfig) -> Self {
        let mut builder = reqwest::Client::builder().timeout(config.timeout());
        if let Some(keepalive) = config.keepalive_time {
            builder = builder.tcp_keepalive(Duration::from_secs(keepalive));
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());
        Self {
            alias: alias.into(),
            model: model.into(),
            config,
            client,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.x.ai".to_string())
    }

    /// Converts history into xAI's chat shape. A user turn carries at most
    /// one image — the first one wins, encoded as a data URL (§4.4.e).
    fn build_messages(&self, messages: &[Message], system_prompt: &str) -> Vec<Value> {
        let (repaired, _stats) = transcript::repair(messages.to_vec());
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
                    let mut content = vec![json!({"type": "text", "text": message.content})];
                    let first_image = message
                        .content_blocks
                        .as_ref()
                        .and_then(|blocks| blocks.iter().find_map(|b| match b {
                            ContentBlock::Image { mime_type, data } => Some((mime_type, data)),
                            _ => None,
                        }))
                        .or_else(|| {
                            message
                                .images
                                .as_ref()
                                .and_then(|images| images.first())
                                .and_then(|b| match b {
                                    ContentBlock::Image { mime_type, data } => Some((mime_type, data)),
                                    _ => None,
                                })
                        });
                    if let Some((mime_type, data)) = first_image {
                        content.push(json!({
                            "type": "image_url",
                            "image_url": {"url": format!("data:{mime_type};base64,{data}")},
                        }));
                    }
                    wire.push(json!({"role": "user", "content": content}));
                }
                Role::System => wire.push(json!({"role": "system", "content": message.content})),
                Role::Assistant => wire.push(json!({"role": "assistant", "content": message.content})),
                Role::ToolUse => wire.push(json!({
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{
                        "id": message.tool_use_id,
                        "type": "function",
                        "function": {
                            "name": message.tool_name.as_deref().map(wire_tool_name),
                            "arguments": message.tool_input.clone().unwrap_or(Value::Null).to_string(),
                        },
                    }],
                })),
                Role::ToolResult => wire.push(json!({
                    "role": "tool",
                    "tool_call_id": message.tool_use_id,
                    "content": message.content,
                })),
            }
        }

        wire
    }

    fn server_tool_defs() -> Vec<Value> {
        SERVER_TOOL_NAMES
            .iter()
            .map(|name| json!({"type": "function", "function": {"name": name}}))
            .collect()
    }

    async fn post_once(&self, body: &Value) -> std::result::Result<Value, GatewayError> {
        let mut request = self.client.post(format!("{}/v1/chat/completions", self.base_url())).json(body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(enhance_error(
                GatewayError::from_text(format!("xai http {status}: {text}")),
                &text,
            ));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl DriverOps for XaiDriver {
    fn name(&self) -> &str {
        &self.alias
    }

    fn driver_type(&self) -> &'static str {
        "xai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn metadata_provider(&self) -> &str {
        self.config.subtype.as_deref().unwrap_or("xai")
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens.unwrap_or(4096)
    }

    fn context_tokens(&self) -> u32 {
        self.config.context_tokens.unwrap_or(131_072)
    }

    fn with_model(&self, model: &str) -> Driver {
        Driver::Xai(XaiDriver::new(self.alias.clone(), model, self.config.clone()))
    }

    fn with_max_tokens(&self, max_tokens: u32) -> Driver {
        let mut config = self.config.clone();
        config.max_tokens = Some(max_tokens);
        Driver::Xai(XaiDriver::new(self.alias.clone(), self.model.clone(), config))
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
        let mut tools = Self::server_tool_defs();
        tools.extend(tool_defs.iter().map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": wire_tool_name(&t.name),
                    "description": t.description,
                    "parameters": t.input_schema,
                },
            })
        }));

        let body = json!({
            "model": self.model,
            "messages": self.build_messages(messages, system_prompt),
            "tools": tools,
            "max_tokens": self.max_tokens(),
            "reasoning_effort": opts.thinking_level.xai_effort(),
        });

        let mut attempt = 0;
        let parsed = loop {
            match self.post_once(&body).await {
                Ok(value) => break value,
                Err(err) if attempt == 0 && is_transient_grpc_fault(&err.to_string()) => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
        };

        let mut accumulator = ResponseAccumulator::new();
        let choice = parsed.pointer("/choices/0");

        if let Some(choice) = choice {
            if let Some(content) = choice.pointer("/message/content").and_then(Value::as_str) {
                if !content.is_empty() {
                    accumulator.push_text(content);
                    on_delta(content);
                }
            }
            if let Some(calls) = choice.pointer("/message/tool_calls").and_then(Value::as_array) {
                for call in calls {
                    let id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                    let wire_name = call.pointer("/function/name").and_then(Value::as_str).unwrap_or_default();
                    let name = unwire_tool_name(wire_name);
                    let arguments = call.pointer("/function/arguments").and_then(Value::as_str).unwrap_or("{}");
                    let input = serde_json::from_str(arguments).unwrap_or(Value::Null);
                    accumulator.set_tool_call(id, name, input);
                }
            }
            if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
                accumulator.set_stop_reason(ResponseAccumulator::map_stop_reason(reason));
            }
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

        if ctx.cancellation.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let mut state = self.state.lock();
        state.last_message_count = messages.len();
        drop(state);

        Ok(accumulator.finish())
    }
}

impl StatefulDriver for XaiDriver {
    fn load_session_state(&mut self, state: SessionState) {
        *self.state.get_mut() = state;
    }

    fn save_session_state(&self) -> SessionState {
        self.state.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::config::DriverKind;

    fn config() -> ProviderConfig {
        ProviderConfig {
            driver: DriverKind::Xai,
            subtype: None,
            api_key: Some("xai-test".into()),
            base_url: None,
            url: None,
            max_tokens: Some(4096),
            context_tokens: None,
            timeout_seconds: 120,
            prompt_caching: false,
            embedding_only: false,
            incremental_context: false,
            server_tools_allowed: None,
            max_turns: None,
            keepalive_time: Some(30),
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
    fn client_tool_colliding_with_server_tool_gets_local_prefix() {
        assert_eq!(wire_tool_name("web_search"), "local_web_search");
        assert_eq!(wire_tool_name("my_custom_tool"), "my_custom_tool");
        assert_eq!(unwire_tool_name("local_web_search"), "web_search");
    }

    #[test]
    fn server_tools_are_always_advertised() {
        let tools = XaiDriver::server_tool_defs();
        let names: Vec<_> = tools.iter().map(|t| t["function"]["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["web_search", "x_search", "code_execution"]);
    }

    #[test]
    fn only_the_first_image_on_a_user_turn_is_kept() {
        let driver = XaiDriver::new("xai", "grok-4", config());
        let mut message = Message::user("look at this");
        message.content_blocks = Some(vec![
            ContentBlock::Image { mime_type: "image/png".into(), data: "aaa".into() },
            ContentBlock::Image { mime_type: "image/png".into(), data: "bbb".into() },
        ]);
        let wire = driver.build_messages(&[message], "");
        let content = wire[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert!(content[1]["image_url"]["url"].as_str().unwrap().contains("aaa"));
    }

    #[test]
    fn recognises_transient_grpc_fault_text() {
        assert!(is_transient_grpc_fault("stream error: RST_STREAM received"));
        assert!(is_transient_grpc_fault("grpc: INTERNAL_ERROR"));
        assert!(!is_transient_grpc_fault("invalid api key"));
    }
}
