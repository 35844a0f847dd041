//! Responses-API WebSocket driver (§4.4.d): a persistent, lazily-established
//! connection carrying `response.create` envelopes and reconstructing a
//! canonical [`Response`] from the `response.*` event stream. Chains server
//! context across calls by remembering the previous `response_id` rather
//! than re-sending the whole transcript once a session is warm (§4.5).

use crate::core::driver::{Driver, DriverOps, DeltaCallback, StatefulDriver, StreamOptions};
use crate::core::session::SessionState;
use crate::core::stream::ResponseAccumulator;
use crate::core::transcript;
use crate::core::types::config::ProviderConfig;
use crate::core::types::context::RequestContext;
use crate::core::types::message::{Message, Role, ToolDefinition};
use crate::core::types::response::{Response, StopReason, Usage};
use crate::error::{enhance_error, GatewayError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug)]
pub struct ResponsesApiDriver {
    alias: String,
    model: String,
    config: ProviderConfig,
    client: reqwest::Client,
    state: Mutex<SessionState>,
}

impl ResponsesApiDriver {
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
            state: Mutex::new(SessionState::default()),
        }
    }

    fn ws_url(&self) -> String {
        self.config
            .url
            .clone()
            .unwrap_or_else(|| "wss://api.openai.com/v1/realtime".to_string())
    }

    fn previous_response_id(&self) -> Option<String> {
        self.state.lock().response_id.clone()
    }

    /// Build the `input` array. When a prior `response_id` exists and the
    /// transcript has only grown, only the new tail is sent — the server
    /// chains context server-side (§4.5 "incremental retry").
    fn build_input(&self, messages: &[Message], system_prompt: &str) -> Vec<Value> {
        let (repaired, _stats) = transcript::repair(messages.to_vec());
        let state = self.state.lock();
        let send_full = !state.supports_incremental(repaired.len()) || !self.config.incremental_context;
        let slice: &[Message] = if send_full {
            &repaired
        } else {
            &repaired[state.last_message_count..]
        };

        let mut input = Vec::with_capacity(slice.len() + 1);
        if send_full && !system_prompt.is_empty() {
            input.push(json!({"role": "system", "content": system_prompt}));
        }
        for message in slice {
            if message.is_empty_user_turn() {
                continue;
            }
            input.push(message_to_item(message));
        }
        input
    }

    /// One connect-send-collect cycle against a fresh WebSocket. Callers
    /// retry this once on `previous_response_not_found` or a transient
    /// transport fault (§4.4.d).
    async fn run_once(
        &self,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
        system_prompt: &str,
        on_delta: DeltaCallback<'_>,
        opts: &StreamOptions<'_>,
        reset: bool,
    ) -> std::result::Result<(Response, Option<String>), DriverFault> {
        if reset {
            *self.state.lock() = SessionState::default();
        }

        let (mut ws, _) = tokio_tungstenite::connect_async(self.ws_url())
            .await
            .map_err(DriverFault::Transport)?;

        let mut envelope = json!({
            "type": "response.create",
            "model": self.model,
            "input": self.build_input(messages, system_prompt),
            "previous_response_id": self.previous_response_id(),
        });
        if !tool_defs.is_empty() {
            envelope["tools"] = json!(tool_defs
                .iter()
                .map(|t| json!({"name": t.name, "description": t.description, "parameters": t.input_schema}))
                .collect::<Vec<_>>());
        }
        if let Some(effort) = opts.thinking_level.openai_effort() {
            envelope["reasoning"] = json!({"effort": effort});
        }

        ws.send(WsMessage::Text(envelope.to_string()))
            .await
            .map_err(DriverFault::WsError)?;

        let mut accumulator = ResponseAccumulator::new();
        let mut response_id = None;

        while let Some(frame) = ws.next().await {
            let frame = frame.map_err(DriverFault::WsError)?;
            let text = match frame {
                WsMessage::Text(text) => text,
                WsMessage::Close(_) => break,
                _ => continue,
            };
            let parsed: Value = match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let event_type = parsed.get("type").and_then(Value::as_str).unwrap_or("");

            match event_type {
                "response.created" => {
                    response_id = parsed.pointer("/response/id").and_then(Value::as_str).map(str::to_string);
                }
                "response.output_text.delta" => {
                    if let Some(delta) = parsed.get("delta").and_then(Value::as_str) {
                        accumulator.push_text(delta);
                        on_delta(delta);
                    }
                }
                "response.reasoning_text.delta" | "response.reasoning_summary_text.delta" => {
                    if let Some(delta) = parsed.get("delta").and_then(Value::as_str) {
                        accumulator.push_thinking(delta);
                    }
                }
                "response.output_item.added" | "response.output_item.done" => {
                    if let Some(item) = parsed.get("item") {
                        if item.get("type").and_then(Value::as_str) == Some("function_call") {
                            let id = item.get("call_id").and_then(Value::as_str).unwrap_or_default();
                            let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
                            let arguments = item.get("arguments").and_then(Value::as_str).unwrap_or("{}");
                            let input = serde_json::from_str(arguments).unwrap_or(Value::Null);
                            accumulator.set_tool_call(id, name, input);
                        }
                    }
                }
                "response.done" | "response.completed" => {
                    if let Some(reason) = parsed.pointer("/response/status").and_then(Value::as_str) {
                        accumulator.set_stop_reason(map_status(reason, accumulator.dropped_tool_calls() > 0));
                    }
                    if let Some(usage) = parsed.pointer("/response/usage") {
                        accumulator.merge_usage(Usage {
                            input_tokens: usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                            output_tokens: usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
                            cache_creation_tokens: 0,
                            cache_read_tokens: usage
                                .pointer("/input_tokens_details/cached_tokens")
                                .and_then(Value::as_u64)
                                .unwrap_or(0) as u32,
                            reasoning_tokens: usage
                                .pointer("/output_tokens_details/reasoning_tokens")
                                .and_then(Value::as_u64)
                                .unwrap_or(0) as u32,
                        });
                    }
                    break;
                }
                "error" => {
                    let message = parsed.pointer("/error/message").and_then(Value::as_str).unwrap_or("");
                    if message.contains("previous_response_not_found") {
                        return Err(DriverFault::PreviousResponseNotFound);
                    }
                    return Err(DriverFault::Provider(message.to_string()));
                }
                _ => {}
            }
        }

        let _ = ws.close(None).await;
        Ok((accumulator.finish(), response_id))
    }
}

#[derive(Debug)]
enum DriverFault {
    Transport(tokio_tungstenite::tungstenite::Error),
    WsError(tokio_tungstenite::tungstenite::Error),
    PreviousResponseNotFound,
    Provider(String),
}

fn map_status(status: &str, has_tool_call: bool) -> StopReason {
    if has_tool_call {
        return StopReason::ToolUse;
    }
    match status {
        "incomplete" => StopReason::MaxTokens,
        _ => StopReason::EndTurn,
    }
}

fn message_to_item(message: &Message) -> Value {
    match message.role {
        Role::User => json!({"role": "user", "content": [{"type": "input_text", "text": message.content}]}),
        Role::System => json!({"role": "system", "content": [{"type": "input_text", "text": message.content}]}),
        Role::Assistant => json!({"role": "assistant", "content": [{"type": "output_text", "text": message.content}]}),
        Role::ToolUse => json!({
            "type": "function_call",
            "call_id": message.tool_use_id,
            "name": message.tool_name,
            "arguments": message.tool_input.clone().unwrap_or(Value::Null).to_string(),
        }),
        Role::ToolResult => json!({
            "type": "function_call_output",
            "call_id": message.tool_use_id,
            "output": message.content,
        }),
    }
}

#[async_trait]
impl DriverOps for ResponsesApiDriver {
    fn name(&self) -> &str {
        &self.alias
    }

    fn driver_type(&self) -> &'static str {
        "responses_api"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn metadata_provider(&self) -> &str {
        self.config.subtype.as_deref().unwrap_or("openai")
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn max_tokens(&self) -> u32 {
        self.config.max_tokens.unwrap_or(4096)
    }

    fn context_tokens(&self) -> u32 {
        self.config.context_tokens.unwrap_or(128_000)
    }

    fn with_model(&self, model: &str) -> Driver {
        Driver::ResponsesApi(ResponsesApiDriver::new(self.alias.clone(), model, self.config.clone()))
    }

    fn with_max_tokens(&self, max_tokens: u32) -> Driver {
        let mut config = self.config.clone();
        config.max_tokens = Some(max_tokens);
        Driver::ResponsesApi(ResponsesApiDriver::new(self.alias.clone(), self.model.clone(), config))
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
        let first = self
            .run_once(messages, tool_defs, system_prompt, &mut *on_delta, &opts, false)
            .await;

        let (response, response_id) = match first {
            Ok(result) => result,
            Err(DriverFault::PreviousResponseNotFound) | Err(DriverFault::Transport(_)) | Err(DriverFault::WsError(_)) => {
                self.run_once(messages, tool_defs, system_prompt, &mut *on_delta, &opts, true)
                    .await
                    .map_err(fault_to_error)?
            }
            Err(fault) => return Err(fault_to_error(fault)),
        };

        if ctx.cancellation.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let mut state = self.state.lock();
        state.response_id = response_id;
        state.last_message_count = messages.len();
        drop(state);

        Ok(response)
    }
}

fn fault_to_error(fault: DriverFault) -> GatewayError {
    match fault {
        DriverFault::Transport(err) | DriverFault::WsError(err) => {
            let text = err.to_string();
            enhance_error(GatewayError::from_text(format!("responses api websocket error: {text}")), &text)
        }
        DriverFault::PreviousResponseNotFound => {
            GatewayError::from_text("previous_response_not_found: session state was reset and the retry also failed")
        }
        DriverFault::Provider(message) => enhance_error(GatewayError::from_text(message.clone()), &message),
    }
}

impl StatefulDriver for ResponsesApiDriver {
    fn load_session_state(&mut self, state: SessionState) {
        *self.state.get_mut() = state;
    }

    fn save_session_state(&self) -> SessionState {
        self.state.lock().clone()
    }
}
