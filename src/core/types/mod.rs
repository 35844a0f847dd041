//! Provider-agnostic data model (§3 of the design spec).

pub mod config;
pub mod context;
pub mod message;
pub mod response;

pub use config::{GatewayConfig, ProviderConfig, PurposeConfig, ThinkingConfigSection};
pub use context::RequestContext;
pub use message::{ContentBlock, Message, Role, ToolDefinition};
pub use response::{Response, StopReason};
