//! Stateful session context: the opaque per-driver state shape and the
//! accessor seam that keeps the registry from depending on the session
//! layer (§4.5, §9).

use serde::{Deserialize, Serialize};

/// State a [`StatefulDriver`](crate::core::driver::StatefulDriver) chains
/// across calls to avoid resending the full transcript.
///
/// `response_id` is the backend-assigned identifier to continue from
/// (`previous_response_id` for the Responses API, `responseID` for xAI).
/// `last_message_count` is the transcript length as of the last successful
/// save; a subsequent call sends only the tail beyond this count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default)]
    pub last_message_count: usize,
}

impl SessionState {
    pub fn is_empty(&self) -> bool {
        self.response_id.is_none() && self.last_message_count == 0
    }

    /// Whether a call against this state can run in incremental mode —
    /// only the tail beyond `last_message_count` needs to be sent.
    pub fn supports_incremental(&self, current_len: usize) -> bool {
        self.response_id.is_some() && self.last_message_count > 0 && current_len > self.last_message_count
    }
}

/// External collaborator that persists [`SessionState`] across process
/// restarts, keyed by `<alias>:<model>` (§4.5, §6). Stateful drivers never
/// call into this directly; the Failover Engine mediates load/save around
/// each call so the registry and the session layer stay decoupled (§9).
pub trait ProviderStateAccessor: Send + Sync {
    fn get(&self, key: &str) -> Option<SessionState>;
    fn set(&self, key: &str, state: SessionState);
}

/// Build the accessor key for an `alias`/`model` pair.
pub fn session_key(alias: &str, model: &str) -> String {
    format!("{alias}:{model}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct InMemoryAccessor {
        map: Mutex<HashMap<String, SessionState>>,
    }

    impl ProviderStateAccessor for InMemoryAccessor {
        fn get(&self, key: &str) -> Option<SessionState> {
            self.map.lock().get(key).cloned()
        }

        fn set(&self, key: &str, state: SessionState) {
            self.map.lock().insert(key.to_string(), state);
        }
    }

    #[test]
    fn load_after_save_round_trips() {
        let accessor = InMemoryAccessor {
            map: Mutex::new(HashMap::new()),
        };
        let key = session_key("openrouter", "gpt-5");
        let state = SessionState {
            response_id: Some("resp_123".into()),
            last_message_count: 5,
        };

        accessor.set(&key, state.clone());
        assert_eq!(accessor.get(&key), Some(state));
    }

    #[test]
    fn incremental_requires_growth_and_prior_response() {
        let empty = SessionState::default();
        assert!(!empty.supports_incremental(5));

        let state = SessionState {
            response_id: Some("r".into()),
            last_message_count: 3,
        };
        assert!(state.supports_incremental(5));
        assert!(!state.supports_incremental(3));
    }
}
