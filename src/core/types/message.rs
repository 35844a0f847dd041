//! The provider-agnostic message and tool-definition types (§3).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The role a [`Message`] was authored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolUse,
    ToolResult,
    System,
}

/// One typed part of a message's `content_blocks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Image { mime_type: String, data: String },
}

/// A single turn in the provider-agnostic transcript.
///
/// Invariants (enforced by [`crate::core::transcript::repair`], not by the
/// constructors here, since malformed histories legitimately arrive from
/// upstream and must be repaired rather than rejected):
///
/// - A `tool_use` message carries both `tool_use_id` and `tool_name`.
/// - A `tool_result` message carries `tool_use_id`.
/// - An empty `user` message with no media is dropped before transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_blocks: Option<Vec<ContentBlock>>,
    /// Flat list of base64 images, kept for producers that predate
    /// `content_blocks`. Drivers treat this as equivalent to a run of
    /// `ContentBlock::Image` appended after any text block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ContentBlock>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Opaque tool-call input, transported without interpretation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Set on synthetic `tool_result` messages the repair pass inserts for
    /// a `tool_use` whose real result never arrived (§4.2 step 4).
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            content_blocks: None,
            images: None,
            tool_use_id: None,
            tool_name: None,
            tool_input: None,
            thinking: None,
            is_error: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            ..Self::user(String::new())
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            ..Self::user(String::new())
        }
    }

    pub fn tool_use(tool_use_id: impl Into<String>, tool_name: impl Into<String>, input: Value) -> Self {
        Self {
            role: Role::ToolUse,
            content: String::new(),
            content_blocks: None,
            images: None,
            tool_use_id: Some(tool_use_id.into()),
            tool_name: Some(tool_name.into()),
            tool_input: Some(input),
            thinking: None,
            is_error: false,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::ToolResult,
            content: content.into(),
            content_blocks: None,
            images: None,
            tool_use_id: Some(tool_use_id.into()),
            tool_name: None,
            tool_input: None,
            thinking: None,
            is_error: false,
        }
    }

    /// Whether this message is an empty `user` turn carrying no media —
    /// the one case §3 says must be dropped before transmission.
    pub fn is_empty_user_turn(&self) -> bool {
        self.role == Role::User
            && self.content.trim().is_empty()
            && self.content_blocks.as_ref().map_or(true, |b| b.is_empty())
            && self.images.as_ref().map_or(true, |i| i.is_empty())
    }
}

/// A tool a provider may call, supplied per call and never mutated by the
/// core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-Schema-shaped parameter description, transported opaquely.
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_user_turn_detection() {
        assert!(Message::user("   ").is_empty_user_turn());
        assert!(!Message::user("hi").is_empty_user_turn());

        let mut with_image = Message::user("");
        with_image.images = Some(vec![ContentBlock::Image {
            mime_type: "image/png".into(),
            data: "abc".into(),
        }]);
        assert!(!with_image.is_empty_user_turn());
    }
}
