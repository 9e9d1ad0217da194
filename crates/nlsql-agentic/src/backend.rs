//! Backend selection for LLM providers
//!
//! Selects which provider the pipeline talks to, driven by the
//! `AGENT_BACKEND` environment variable.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;

use crate::deepseek_client::DeepSeekClient;
use crate::llm_client::LlmClient;
use crate::openai_client::OpenAiClient;

/// Which LLM provider to use for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentBackend {
    /// DeepSeek (deepseek-chat) - default
    #[default]
    DeepSeek,
    /// OpenAI (gpt-4o-mini by default)
    OpenAi,
}

impl AgentBackend {
    /// Read the backend from the `AGENT_BACKEND` env var,
    /// falling back to the default when unset or unrecognized.
    pub fn from_env() -> Self {
        std::env::var("AGENT_BACKEND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentBackend::DeepSeek => "deepseek",
            AgentBackend::OpenAi => "openai",
        }
    }
}

impl FromStr for AgentBackend {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deepseek" | "deep-seek" => Ok(AgentBackend::DeepSeek),
            "openai" | "open-ai" | "gpt" => Ok(AgentBackend::OpenAi),
            other => Err(ParseBackendError(other.to_string())),
        }
    }
}

impl fmt::Display for AgentBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct ParseBackendError(pub String);

impl fmt::Display for ParseBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown agent backend '{}' (expected 'deepseek' or 'openai')",
            self.0
        )
    }
}

impl std::error::Error for ParseBackendError {}

/// Create an LLM client for the backend selected via environment.
/// API keys are read from the provider's own env vars.
pub fn create_llm_client() -> Result<Arc<dyn LlmClient>> {
    create_llm_client_for(AgentBackend::from_env())
}

/// Create an LLM client for a specific backend, reading the API key
/// from the provider's environment variables.
pub fn create_llm_client_for(backend: AgentBackend) -> Result<Arc<dyn LlmClient>> {
    match backend {
        AgentBackend::DeepSeek => Ok(Arc::new(DeepSeekClient::from_env()?)),
        AgentBackend::OpenAi => Ok(Arc::new(OpenAiClient::from_env()?)),
    }
}

/// Create an LLM client for a specific backend with an explicit API key.
pub fn create_llm_client_with_key(backend: AgentBackend, api_key: String) -> Arc<dyn LlmClient> {
    match backend {
        AgentBackend::DeepSeek => Arc::new(DeepSeekClient::new(api_key)),
        AgentBackend::OpenAi => Arc::new(OpenAiClient::new(api_key)),
    }
}
