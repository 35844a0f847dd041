//! Provider Driver Contract (§4.3): a uniform capability-set surface
//! implemented by the four concrete drivers plus the OpenAI-compatible
//! family, dispatched through a single [`Driver`] enum rather than trait
//! objects so the Registry never needs `Arc<dyn Any>` downcasting (§9).

pub mod anthropic;
pub mod ollama;
pub mod openai_compatible;
pub mod responses_ws;
pub mod xai;

use crate::core::session::SessionState;
use crate::core::thinking::ThinkingLevel;
use crate::core::types::context::RequestContext;
use crate::core::types::message::{Message, ToolDefinition};
use crate::core::types::response::Response;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;

/// Callback contract shared by `on_delta`/`on_thinking_delta`: invoked
/// synchronously, ordered, never concurrently with itself for one call
/// (§4.3). Callers push to unbounded channels or short buffers — the
/// callback itself must never block indefinitely (§5).
pub type DeltaCallback<'a> = &'a mut (dyn FnMut(&str) + Send);

/// Forwarded as a server-side tool call transitions `pending -> completed
/// | failed` (§4.7).
pub type ServerToolCallback<'a> =
    &'a mut (dyn FnMut(&crate::core::stream::ServerToolEvent) + Send);

/// Per-call streaming options (§4.3).
pub struct StreamOptions<'a> {
    pub thinking_level: ThinkingLevel,
    pub thinking_budget: Option<u32>,
    pub on_thinking_delta: Option<DeltaCallback<'a>>,
    pub on_server_tool_call: Option<ServerToolCallback<'a>>,
}

impl Default for StreamOptions<'_> {
    fn default() -> Self {
        Self {
            thinking_level: ThinkingLevel::default(),
            thinking_budget: None,
            on_thinking_delta: None,
            on_server_tool_call: None,
        }
    }
}

/// The capability set every driver satisfies (§4.3).
///
/// Optional capabilities — stateful session chaining, model validation,
/// setup/health probing — live in the narrower traits below, so a caller
/// probes for them rather than every driver stubbing out methods it
/// doesn't support (§9: "Multi-backend polymorphism").
#[async_trait]
pub trait DriverOps: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn driver_type(&self) -> &'static str;
    fn model(&self) -> &str;
    /// Hint resolving metadata-catalog lookups (§4.6 step 1).
    fn metadata_provider(&self) -> &str;
    fn is_available(&self) -> bool;
    fn max_tokens(&self) -> u32;
    fn context_tokens(&self) -> u32;

    /// Fresh driver bound to `model`, empty session state, metric prefix
    /// `llm/<type>/<name>/<model>` (§4.3).
    fn with_model(&self, model: &str) -> Driver;
    /// Shallow clone preserving session state, with a max-tokens override.
    fn with_max_tokens(&self, max_tokens: u32) -> Driver;

    async fn stream(
        &self,
        ctx: &RequestContext,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
        system_prompt: &str,
        on_delta: DeltaCallback<'_>,
        opts: StreamOptions<'_>,
    ) -> Result<Response>;

    /// Typically piped through `stream` with a text-only accumulator
    /// (§4.3).
    async fn simple(&self, ctx: &RequestContext, user_text: &str, system_prompt: &str) -> Result<String> {
        let messages = vec![Message::user(user_text)];
        let mut text = String::new();
        let mut on_delta = |delta: &str| text.push_str(delta);
        self.stream(
            ctx,
            &messages,
            &[],
            system_prompt,
            &mut on_delta,
            StreamOptions::default(),
        )
        .await?;
        Ok(text)
    }

    fn supports_embeddings(&self) -> bool {
        false
    }
    fn embedding_dimensions(&self) -> Option<u32> {
        None
    }
    async fn embed(&self, _ctx: &RequestContext, _text: &str) -> Result<Vec<f32>> {
        Err(crate::error::GatewayError::UnsupportedModel {
            driver: self.driver_type().to_string(),
            model: self.model().to_string(),
            message: "this driver does not support embeddings".to_string(),
        })
    }
    async fn embed_batch(&self, ctx: &RequestContext, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(ctx, text).await?);
        }
        Ok(out)
    }
}

/// Drivers that chain server-side context across calls (§4.5): the
/// Responses-API and xAI drivers. Implementers must never call into the
/// session layer directly — the Failover Engine mediates load/save
/// through [`crate::core::session::ProviderStateAccessor`] (§9).
pub trait StatefulDriver: DriverOps {
    fn load_session_state(&mut self, state: SessionState);
    fn save_session_state(&self) -> SessionState;
}

/// Result of validating a model name against a driver's restrictions
/// (§4.3, §6 "Exit codes").
#[derive(Debug, Clone)]
pub struct ModelValidation {
    pub fatal: bool,
    pub message: String,
}

/// Drivers that refuse certain model names outright (§4.3).
pub trait ModelValidator: DriverOps {
    fn validate_model(&self, model: &str) -> Option<ModelValidation>;
}

/// Setup/health-check surface (§4.3).
#[async_trait]
pub trait CapabilitiesProbe: DriverOps {
    async fn list_models(&self, ctx: &RequestContext) -> Result<Vec<String>>;
    async fn test_connection(&self, ctx: &RequestContext) -> Result<()>;
}

/// Concrete dispatch wrapper unifying the five drivers. The Registry holds
/// these directly instead of `Box<dyn DriverOps>`, so optional-capability
/// probing (`as_stateful`, `as_validator`) is a plain match rather than a
/// downcast (§9).
#[derive(Debug)]
pub enum Driver {
    Anthropic(anthropic::AnthropicDriver),
    OpenaiCompatible(openai_compatible::OpenAiCompatibleDriver),
    Ollama(ollama::OllamaDriver),
    ResponsesApi(responses_ws::ResponsesApiDriver),
    Xai(xai::XaiDriver),
}

macro_rules! dispatch {
    ($self:expr, $method:ident($($arg:expr),*)) => {
        match $self {
            Driver::Anthropic(d) => d.$method($($arg),*),
            Driver::OpenaiCompatible(d) => d.$method($($arg),*),
            Driver::Ollama(d) => d.$method($($arg),*),
            Driver::ResponsesApi(d) => d.$method($($arg),*),
            Driver::Xai(d) => d.$method($($arg),*),
        }
    };
}

impl Driver {
    pub fn name(&self) -> &str {
        dispatch!(self, name())
    }

    pub fn driver_type(&self) -> &'static str {
        dispatch!(self, driver_type())
    }

    pub fn model(&self) -> &str {
        dispatch!(self, model())
    }

    pub fn metadata_provider(&self) -> &str {
        dispatch!(self, metadata_provider())
    }

    pub fn is_available(&self) -> bool {
        dispatch!(self, is_available())
    }

    pub fn max_tokens(&self) -> u32 {
        dispatch!(self, max_tokens())
    }

    pub fn context_tokens(&self) -> u32 {
        dispatch!(self, context_tokens())
    }

    pub fn with_model(&self, model: &str) -> Driver {
        dispatch!(self, with_model(model))
    }

    pub fn with_max_tokens(&self, max_tokens: u32) -> Driver {
        dispatch!(self, with_max_tokens(max_tokens))
    }

    pub fn supports_embeddings(&self) -> bool {
        dispatch!(self, supports_embeddings())
    }

    pub async fn stream(
        &self,
        ctx: &RequestContext,
        messages: &[Message],
        tool_defs: &[ToolDefinition],
        system_prompt: &str,
        on_delta: DeltaCallback<'_>,
        opts: StreamOptions<'_>,
    ) -> Result<Response> {
        match self {
            Driver::Anthropic(d) => d.stream(ctx, messages, tool_defs, system_prompt, on_delta, opts).await,
            Driver::OpenaiCompatible(d) => {
                d.stream(ctx, messages, tool_defs, system_prompt, on_delta, opts).await
            }
            Driver::Ollama(d) => d.stream(ctx, messages, tool_defs, system_prompt, on_delta, opts).await,
            Driver::ResponsesApi(d) => {
                d.stream(ctx, messages, tool_defs, system_prompt, on_delta, opts).await
            }
            Driver::Xai(d) => d.stream(ctx, messages, tool_defs, system_prompt, on_delta, opts).await,
        }
    }

    pub async fn simple(&self, ctx: &RequestContext, user_text: &str, system_prompt: &str) -> Result<String> {
        match self {
            Driver::Anthropic(d) => d.simple(ctx, user_text, system_prompt).await,
            Driver::OpenaiCompatible(d) => d.simple(ctx, user_text, system_prompt).await,
            Driver::Ollama(d) => d.simple(ctx, user_text, system_prompt).await,
            Driver::ResponsesApi(d) => d.simple(ctx, user_text, system_prompt).await,
            Driver::Xai(d) => d.simple(ctx, user_text, system_prompt).await,
        }
    }

    pub async fn embed(&self, ctx: &RequestContext, text: &str) -> Result<Vec<f32>> {
        match self {
            Driver::Anthropic(d) => d.embed(ctx, text).await,
            Driver::OpenaiCompatible(d) => d.embed(ctx, text).await,
            Driver::Ollama(d) => d.embed(ctx, text).await,
            Driver::ResponsesApi(d) => d.embed(ctx, text).await,
            Driver::Xai(d) => d.embed(ctx, text).await,
        }
    }

    /// Probe for the stateful capability without downcasting (§9).
    pub fn as_stateful_mut(&mut self) -> Option<&mut dyn StatefulDriver> {
        match self {
            Driver::ResponsesApi(d) => Some(d),
            Driver::Xai(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_validator(&self) -> Option<&dyn ModelValidator> {
        match self {
            Driver::Ollama(d) => Some(d),
            _ => None,
        }
    }
}
