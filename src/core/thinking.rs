//! Thinking-Level Mapper: translates an abstract effort level into the
//! reasoning parameters each driver family understands (§4.8).

use serde::{Deserialize, Serialize};

/// Abstract reasoning effort, independent of any one backend's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    Minimal,
    Low,
    #[default]
    Medium,
    High,
    Xhigh,
}

impl ThinkingLevel {
    /// Parse a persisted-config string, falling back to [`ThinkingLevel::Medium`]
    /// for anything unrecognised (§4.8: "unknown string → default").
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "off" => ThinkingLevel::Off,
            "minimal" => ThinkingLevel::Minimal,
            "low" => ThinkingLevel::Low,
            "medium" => ThinkingLevel::Medium,
            "high" => ThinkingLevel::High,
            "xhigh" => ThinkingLevel::Xhigh,
            _ => ThinkingLevel::default(),
        }
    }

    /// OpenAI/OpenRouter-style `reasoning.effort` string. `None` means the
    /// reasoning field is omitted entirely.
    pub fn openai_effort(self) -> Option<&'static str> {
        match self {
            ThinkingLevel::Off => None,
            ThinkingLevel::Minimal | ThinkingLevel::Low => Some("low"),
            ThinkingLevel::Medium => Some("medium"),
            ThinkingLevel::High | ThinkingLevel::Xhigh => Some("high"),
        }
    }

    /// Anthropic `thinking.budget_tokens`. Zero means the block is omitted.
    pub fn anthropic_budget(self) -> u32 {
        match self {
            ThinkingLevel::Off => 0,
            ThinkingLevel::Minimal => 1024,
            ThinkingLevel::Low => 4096,
            ThinkingLevel::Medium => 10_000,
            ThinkingLevel::High => 25_000,
            ThinkingLevel::Xhigh => 50_000,
        }
    }

    /// xAI reasoning effort. `None` at `off` means no reasoning parameter.
    pub fn xai_effort(self) -> Option<&'static str> {
        match self {
            ThinkingLevel::Off => None,
            ThinkingLevel::Minimal | ThinkingLevel::Low => Some("Low"),
            ThinkingLevel::Medium => Some("Medium"),
            ThinkingLevel::High | ThinkingLevel::Xhigh => Some("High"),
        }
    }

    pub fn is_off(self) -> bool {
        self == ThinkingLevel::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_table_exactly() {
        let cases = [
            (ThinkingLevel::Off, None, 0, None),
            (ThinkingLevel::Minimal, Some("low"), 1024, Some("Low")),
            (ThinkingLevel::Low, Some("low"), 4096, Some("Low")),
            (ThinkingLevel::Medium, Some("medium"), 10_000, Some("Medium")),
            (ThinkingLevel::High, Some("high"), 25_000, Some("High")),
            (ThinkingLevel::Xhigh, Some("high"), 50_000, Some("High")),
        ];
        for (level, openai, anthropic, xai) in cases {
            assert_eq!(level.openai_effort(), openai, "{level:?}");
            assert_eq!(level.anthropic_budget(), anthropic, "{level:?}");
            assert_eq!(level.xai_effort(), xai, "{level:?}");
        }
    }

    #[test]
    fn unknown_string_defaults_to_medium() {
        assert_eq!(ThinkingLevel::parse("bogus"), ThinkingLevel::Medium);
        assert_eq!(ThinkingLevel::parse("HIGH"), ThinkingLevel::High);
    }
}
