//! # llm-gateway-core
//!
//! Core runtime for a multi-provider LLM gateway: a provider registry with
//! automatic failover, a uniform driver contract implemented by four
//! distinct backend wire protocols plus an OpenAI-compatible family,
//! streaming response accumulation, transcript repair, and cost/metrics
//! accounting.
//!
//! This crate deliberately stops at the core. It does not parse CLI
//! arguments, serve HTTP, persist sessions, or estimate tokens from text —
//! those are external collaborators that consume the interfaces defined
//! here (see [`core::session`] for the session-state seam and
//! [`core::cost`] for the pricing-catalog seam).
//!
//! ## Layout
//!
//! - [`error`] — the shared error taxonomy and classifier.
//! - [`core::types`] — provider-agnostic message/response/config types.
//! - [`core::transcript`] — tool-use/tool-result repair before wire serialization.
//! - [`core::driver`] — the `Driver` capability-set contract and its five
//!   concrete implementations.
//! - [`core::stream`] — the shared streaming accumulation pattern and SSE parser.
//! - [`core::thinking`] — the reasoning-effort-level mapper.
//! - [`core::session`] — the stateful-driver session seam.
//! - [`core::cost`] — pricing resolution and metrics emission.
//! - [`core::router`] — the provider registry, purpose gate, failover engine,
//!   and cooldown policy.
//! - [`config`] — persisted configuration loading and atomic apply.

#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod core;
pub mod error;
pub mod utils;

pub use error::{ErrorKind, GatewayError};

pub use core::cost;
pub use core::driver;
pub use core::router;
pub use core::session;
pub use core::stream;
pub use core::thinking;
pub use core::transcript;
pub use core::types;

pub use core::router::{FailoverEngine, Registry};
pub use core::types::config::{ProviderConfig, PurposeConfig};
pub use core::types::message::{ContentBlock, Message, Role, ToolDefinition};
pub use core::types::response::{Response, StopReason};

/// Current version of the crate, exposed for diagnostics and `User-Agent` headers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
