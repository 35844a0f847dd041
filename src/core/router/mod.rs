//! Provider Registry & Failover Engine (§4.9, §4.10): owns one driver per
//! configured alias, gates purpose chains against model validators and
//! capability metadata, and walks candidate chains at call time with
//! per-alias exponential-backoff cooldowns.

pub mod cooldown;
pub mod failover;
pub mod registry;
pub mod resolver;

pub use cooldown::{CooldownMap, ProviderStatus};
pub use failover::{Attempt, CallOutcome, FailoverEngine};
pub use registry::Registry;
pub use resolver::parse_model_ref;
