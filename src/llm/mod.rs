//! LLM integration for the intake pipeline.
//!
//! Supports:
//! - **Anthropic**: Direct API access via rig-core
//! - **OpenAI**: Direct API access via rig-core
//!
//! Uses the rig-core crate for HTTP transport and the `RigAdapter` to bridge
//! rig's `CompletionModel` trait to our `LlmProvider` trait. The classifier
//! and extractor share one provider; they differ only in prompts.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
}

impl LlmConfig {
    /// Read backend, API key, and model from the environment.
    ///
    /// `INTAKE_LLM_BACKEND` selects the provider (default "anthropic");
    /// the key comes from the provider's standard variable; `INTAKE_MODEL`
    /// overrides the per-backend default model.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = parse_backend(std::env::var("INTAKE_LLM_BACKEND").ok().as_deref())?;
        let key_var = match backend {
            LlmBackend::Anthropic => "ANTHROPIC_API_KEY",
            LlmBackend::OpenAi => "OPENAI_API_KEY",
        };
        let api_key = std::env::var(key_var)
            .map(secrecy::SecretString::from)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;
        let model = std::env::var("INTAKE_MODEL").unwrap_or_else(|_| {
            match backend {
                LlmBackend::Anthropic => "claude-3-5-haiku-latest",
                LlmBackend::OpenAi => "gpt-4o-mini",
            }
            .to_string()
        });
        Ok(Self {
            backend,
            api_key,
            model,
        })
    }
}

fn parse_backend(raw: Option<&str>) -> Result<LlmBackend, ConfigError> {
    match raw {
        None | Some("anthropic") => Ok(LlmBackend::Anthropic),
        Some("openai") => Ok(LlmBackend::OpenAi),
        Some(other) => Err(ConfigError::InvalidValue {
            key: "INTAKE_LLM_BACKEND".to_string(),
            message: format!("unknown backend {other:?}, expected \"anthropic\" or \"openai\""),
        }),
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {}", e),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
///
/// Both the classifier and the extractor demand bare JSON, but models still
/// wrap it in code fences or prose often enough that parsing the raw text
/// directly would be a reliability bug.
pub(crate) fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
