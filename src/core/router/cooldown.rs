//! Cooldown Policy (§4.10): per-alias exponential backoff, not per-model —
//! every model routed through one provider alias shares the same gate.

use crate::error::ErrorKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

const NON_BILLING_BASE_SECS: u64 = 60;
const BILLING_BASE_SECS: u64 = 5 * 60 * 60;
const NON_BILLING_CLAMP_SECS: u64 = 60 * 60;
const BILLING_CLAMP_SECS: u64 = 24 * 60 * 60;

/// `duration = base * factor^(min(n-1, cap))`, clamped (§4.10).
fn schedule(n: u32, is_billing: bool) -> Duration {
    let n = n.max(1);
    let secs = if is_billing {
        let exponent = (n - 1).min(2);
        (BILLING_BASE_SECS * 2u64.pow(exponent)).min(BILLING_CLAMP_SECS)
    } else {
        let exponent = (n - 1).min(3);
        (NON_BILLING_BASE_SECS * 5u64.pow(exponent)).min(NON_BILLING_CLAMP_SECS)
    };
    Duration::from_secs(secs)
}

#[derive(Debug, Clone)]
struct Entry {
    until: SystemTime,
    error_count: u32,
    reason: ErrorKind,
}

/// One alias's cooldown snapshot, surfaced via [`CooldownMap::provider_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderStatus {
    pub in_cooldown: bool,
    pub until: Option<SystemTime>,
    pub reason: Option<ErrorKind>,
    pub error_count: u32,
}

/// Per-alias cooldown state, guarded by its own lock — deliberately separate
/// from the provider map's lock (§5 "Shared resources & locking discipline").
#[derive(Debug, Default)]
pub struct CooldownMap {
    entries: RwLock<HashMap<String, Entry>>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when `alias` is currently past its cooldown gate.
    pub fn is_in_cooldown(&self, alias: &str, now: SystemTime) -> bool {
        self.entries
            .read()
            .get(alias)
            .is_some_and(|entry| entry.until > now)
    }

    /// Record a failover-eligible failure, advancing the alias's schedule.
    pub fn record_failure(&self, alias: &str, kind: ErrorKind, now: SystemTime) {
        let mut entries = self.entries.write();
        let error_count = entries.get(alias).map_or(1, |e| e.error_count + 1);
        let duration = schedule(error_count, crate::error::is_billing(kind));
        entries.insert(
            alias.to_string(),
            Entry {
                until: now + duration,
                error_count,
                reason: kind,
            },
        );
    }

    /// Clear an alias's entry on success. Returns `true` if an entry was
    /// actually present (so the caller can report a `Recovery`).
    pub fn clear(&self, alias: &str) -> bool {
        self.entries.write().remove(alias).is_some()
    }

    pub fn clear_all(&self) {
        self.entries.write().clear();
    }

    pub fn status(&self, alias: &str, now: SystemTime) -> ProviderStatus {
        match self.entries.read().get(alias) {
            Some(entry) => ProviderStatus {
                in_cooldown: entry.until > now,
                until: Some(entry.until),
                reason: Some(entry.reason),
                error_count: entry.error_count,
            },
            None => ProviderStatus {
                in_cooldown: false,
                until: None,
                reason: None,
                error_count: 0,
            },
        }
    }

    pub fn all_statuses(&self, now: SystemTime) -> HashMap<String, ProviderStatus> {
        self.entries
            .read()
            .iter()
            .map(|(alias, entry)| {
                (
                    alias.clone(),
                    ProviderStatus {
                        in_cooldown: entry.until > now,
                        until: Some(entry.until),
                        reason: Some(entry.reason),
                        error_count: entry.error_count,
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_billing_schedule_matches_spec_sequence() {
        assert_eq!(schedule(1, false), Duration::from_secs(60));
        assert_eq!(schedule(2, false), Duration::from_secs(300));
        assert_eq!(schedule(3, false), Duration::from_secs(1500));
        assert_eq!(schedule(4, false), Duration::from_secs(3600));
        assert_eq!(schedule(5, false), Duration::from_secs(3600));
    }

    #[test]
    fn billing_schedule_matches_spec_sequence() {
        assert_eq!(schedule(1, true), Duration::from_secs(5 * 3600));
        assert_eq!(schedule(2, true), Duration::from_secs(10 * 3600));
        assert_eq!(schedule(3, true), Duration::from_secs(20 * 3600));
        // The exponent caps at n-1=2, so 20h is the ceiling the formula
        // reaches; the 24h clamp exists for completeness but is unreachable
        // by this sequence.
        assert_eq!(schedule(4, true), Duration::from_secs(20 * 3600));
    }

    #[test]
    fn success_clears_entry_and_reports_recovery() {
        let map = CooldownMap::new();
        let now = SystemTime::now();
        map.record_failure("anthropic", ErrorKind::RateLimit, now);
        assert!(map.is_in_cooldown("anthropic", now));
        assert!(map.clear("anthropic"));
        assert!(!map.is_in_cooldown("anthropic", now));
        assert!(!map.clear("anthropic"));
    }

    #[test]
    fn consecutive_failures_increment_error_count() {
        let map = CooldownMap::new();
        let now = SystemTime::now();
        map.record_failure("a", ErrorKind::Timeout, now);
        map.record_failure("a", ErrorKind::Timeout, now);
        let status = map.status("a", now);
        assert_eq!(status.error_count, 2);
        assert_eq!(status.until, Some(now + Duration::from_secs(300)));
    }
}
