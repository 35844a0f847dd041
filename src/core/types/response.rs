//! The canonical [`Response`] every driver folds its stream into (§3, §4.7).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

/// A single pending client tool call — the caller executes it and feeds a
/// `tool_result` message back on the next turn. Only one is ever carried
/// per [`Response`]; a driver that observes more than one client tool call
/// in a turn keeps the first and logs the rest (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_input: Value,
}

/// Token accounting for one completed call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_creation_tokens: u32,
    pub cache_read_tokens: u32,
    pub reasoning_tokens: u32,
}

/// The accumulated result of a chat call, whether it arrived streamed or
/// all at once.
///
/// Invariant: when `tool_call` is `Some`, `stop_reason` is always
/// [`StopReason::ToolUse`] — callers can match on `tool_call.is_some()` and
/// `stop_reason` interchangeably, but the core always keeps both
/// consistent so neither check is load-bearing on its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub thinking: String,
    pub tool_call: Option<ToolCall>,
    pub stop_reason: StopReasonOpt,
    pub usage: Usage,
}

/// `StopReason` with a default of `EndTurn`, so a freshly-built [`Response`]
/// is well-formed before any chunk has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopReasonOpt(pub StopReason);

impl Default for StopReasonOpt {
    fn default() -> Self {
        StopReasonOpt(StopReason::EndTurn)
    }
}

impl Response {
    /// Enforce the tool-call/stop-reason invariant. Drivers call this once
    /// after folding the last chunk rather than maintaining the invariant
    /// chunk-by-chunk, since a client tool call may only become apparent at
    /// the very end of a stream.
    pub fn finalize(mut self) -> Self {
        if self.tool_call.is_some() {
            self.stop_reason = StopReasonOpt(StopReason::ToolUse);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalize_forces_tool_use_stop_reason() {
        let response = Response {
            tool_call: Some(ToolCall {
                tool_use_id: "t1".into(),
                tool_name: "search".into(),
                tool_input: serde_json::json!({}),
            }),
            stop_reason: StopReasonOpt(StopReason::EndTurn),
            ..Default::default()
        }
        .finalize();

        assert_eq!(response.stop_reason.0, StopReason::ToolUse);
    }

    #[test]
    fn default_response_is_end_turn() {
        assert_eq!(Response::default().stop_reason.0, StopReason::EndTurn);
    }
}
