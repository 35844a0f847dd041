//! Small free functions shared across drivers and the registry.
//!
//! Kept intentionally thin — anything that grows real behavior (pricing,
//! classification, transcript repair) gets its own module instead of
//! living here.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a unique request id for span/log correlation.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Truncate a string to at most `max_len` bytes, appending `"..."` when
/// truncated. Used by transcript repair (§4.2: 500/1000-char limits on
/// textualised tool calls and results).
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut end = max_len.saturating_sub(3);
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_string_respects_limit() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 8), "hello...");
    }

    #[test]
    fn truncate_string_is_utf8_safe() {
        let s = "a".repeat(10) + "日本語";
        let truncated = truncate_string(&s, 11);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }
}
