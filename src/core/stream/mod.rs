//! Stream Processor: the per-driver accumulation pattern that folds
//! incoming chunks into a canonical [`Response`], shared across every
//! driver's event loop (§4.7).

pub mod sse;

use crate::core::types::response::{Response, StopReason, StopReasonOpt, ToolCall, Usage};
use serde_json::Value;

/// A callback invoked synchronously on the driver's stream-reading task,
/// ordered, never concurrently with itself for a single call (§4.3).
pub type DeltaCallback<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// One server-executed tool call's lifecycle transition, forwarded to
/// `on_server_tool_call` as it progresses (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerToolState {
    Pending,
    Completed,
    Failed,
}

/// A server tool invocation record, both forwarded to the caller's
/// callback and formatted into the reasoning stream for visibility.
#[derive(Debug, Clone)]
pub struct ServerToolEvent {
    pub name: String,
    pub state: ServerToolState,
    pub detail: Option<String>,
}

impl ServerToolEvent {
    /// Human-readable line folded into the reasoning/thinking stream.
    pub fn reasoning_line(&self) -> String {
        let state = match self.state {
            ServerToolState::Pending => "pending",
            ServerToolState::Completed => "completed",
            ServerToolState::Failed => "failed",
        };
        match &self.detail {
            Some(detail) => format!("[Server tool {} ({state})]: {detail}", self.name),
            None => format!("[Server tool {} ({state})]", self.name),
        }
    }
}

/// Accumulates streamed deltas into a [`Response`] per §4.7: separate text
/// and reasoning builders, the first client tool call only (later ones
/// logged and dropped), and last-write-wins finish-reason/usage.
#[derive(Debug)]
pub struct ResponseAccumulator {
    text: String,
    thinking: String,
    tool_call: Option<ToolCall>,
    stop_reason: StopReason,
    usage: Usage,
    dropped_tool_calls: u32,
}

impl Default for ResponseAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            thinking: String::new(),
            tool_call: None,
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
            dropped_tool_calls: 0,
        }
    }

    pub fn push_text(&mut self, delta: &str) {
        self.text.push_str(delta);
    }

    pub fn push_thinking(&mut self, delta: &str) {
        self.thinking.push_str(delta);
    }

    /// Append a server tool's lifecycle line into the reasoning stream, as
    /// §4.7 requires ("also formatted into the reasoning stream").
    pub fn push_server_tool_event(&mut self, event: &ServerToolEvent) {
        if !self.thinking.is_empty() {
            self.thinking.push('\n');
        }
        self.thinking.push_str(&event.reasoning_line());
    }

    /// Record a client tool call. Only the first one per turn is kept;
    /// later ones are counted and dropped (§4.7).
    pub fn set_tool_call(&mut self, tool_use_id: impl Into<String>, tool_name: impl Into<String>, tool_input: Value) {
        if self.tool_call.is_some() {
            self.dropped_tool_calls += 1;
            return;
        }
        self.tool_call = Some(ToolCall {
            tool_use_id: tool_use_id.into(),
            tool_name: tool_name.into(),
            tool_input,
        });
    }

    pub fn dropped_tool_calls(&self) -> u32 {
        self.dropped_tool_calls
    }

    /// Last-write-wins finish-reason (§4.7).
    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = reason;
    }

    pub fn merge_usage(&mut self, usage: Usage) {
        self.usage = usage;
    }

    /// Map an unrecognised vendor finish-reason string to the canonical
    /// set, defaulting to `end_turn` (§4.7).
    pub fn map_stop_reason(raw: &str) -> StopReason {
        match raw {
            "tool_calls" | "tool_use" | "function_call" => StopReason::ToolUse,
            "length" | "max_tokens" => StopReason::MaxTokens,
            "stop" | "end_turn" | "" => StopReason::EndTurn,
            _ => StopReason::EndTurn,
        }
    }

    /// Fold accumulated state into the canonical [`Response`], forcing
    /// `stop_reason = tool_use` whenever a client tool call was captured.
    pub fn finish(self) -> Response {
        Response {
            text: self.text,
            thinking: self.thinking,
            tool_call: self.tool_call,
            stop_reason: StopReasonOpt(self.stop_reason),
            usage: self.usage,
        }
        .finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_text_and_thinking_separately() {
        let mut acc = ResponseAccumulator::new();
        acc.push_text("hello ");
        acc.push_text("world");
        acc.push_thinking("pondering");
        let response = acc.finish();
        assert_eq!(response.text, "hello world");
        assert_eq!(response.thinking, "pondering");
    }

    #[test]
    fn keeps_only_first_client_tool_call() {
        let mut acc = ResponseAccumulator::new();
        acc.set_tool_call("t1", "search", serde_json::json!({"q": "a"}));
        acc.set_tool_call("t2", "search2", serde_json::json!({"q": "b"}));
        assert_eq!(acc.dropped_tool_calls(), 1);
        let response = acc.finish();
        assert_eq!(response.tool_call.unwrap().tool_use_id, "t1");
        assert_eq!(response.stop_reason.0, StopReason::ToolUse);
    }

    #[test]
    fn unrecognised_finish_reason_defaults_to_end_turn() {
        assert_eq!(ResponseAccumulator::map_stop_reason("weird"), StopReason::EndTurn);
        assert_eq!(ResponseAccumulator::map_stop_reason("tool_calls"), StopReason::ToolUse);
        assert_eq!(ResponseAccumulator::map_stop_reason("length"), StopReason::MaxTokens);
    }

    #[test]
    fn server_tool_event_is_folded_into_reasoning_stream() {
        let mut acc = ResponseAccumulator::new();
        acc.push_thinking("first thought");
        acc.push_server_tool_event(&ServerToolEvent {
            name: "web_search".into(),
            state: ServerToolState::Completed,
            detail: Some("3 results".into()),
        });
        let response = acc.finish();
        assert!(response.thinking.contains("first thought"));
        assert!(response.thinking.contains("[Server tool web_search (completed)]: 3 results"));
    }
}
