//! `alias/model` reference parsing and driver instantiation (§4.9, §6: "a
//! model id MAY itself contain slashes; parsing uses exactly the first
//! slash").

use crate::core::driver::{anthropic, ollama, openai_compatible, responses_ws, xai, Driver};
use crate::core::types::config::{DriverKind, ProviderConfig};
use crate::error::{GatewayError, Result};

/// Split `"<alias>/<model-id>"` on the first slash only, so a model id that
/// itself contains slashes (e.g. an OpenRouter-fronted
/// `anthropic/claude-opus-4.5`) survives intact.
pub fn parse_model_ref(reference: &str) -> Result<(&str, &str)> {
    reference
        .split_once('/')
        .filter(|(alias, model)| !alias.is_empty() && !model.is_empty())
        .ok_or_else(|| GatewayError::InvalidModelReference(reference.to_string()))
}

/// Build a fresh driver instance for one configured provider alias,
/// dispatching on [`DriverKind`] (§4.9 step 1: "Instantiates one driver per
/// configured provider alias").
pub fn build_driver(alias: &str, model: &str, config: &ProviderConfig) -> Driver {
    match config.driver {
        DriverKind::Anthropic => Driver::Anthropic(anthropic::AnthropicDriver::new(alias, model, config.clone())),
        DriverKind::OpenaiCompatible => {
            Driver::OpenaiCompatible(openai_compatible::OpenAiCompatibleDriver::new(alias, model, config.clone()))
        }
        DriverKind::Ollama => Driver::Ollama(ollama::OllamaDriver::new(alias, model, config.clone())),
        DriverKind::ResponsesApi => {
            Driver::ResponsesApi(responses_ws::ResponsesApiDriver::new(alias, model, config.clone()))
        }
        DriverKind::Xai => Driver::Xai(xai::XaiDriver::new(alias, model, config.clone())),
    }
}
