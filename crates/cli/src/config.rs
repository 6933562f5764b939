//! Configuration loading from tether.toml.

use crate::backend::CliBackend;
use runtime::providers::{AnthropicBackendBuilder, OpenAiBackendBuilder};
use runtime::{AnthropicAuth, HostAddress, SessionConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Backend configuration.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Loop limits.
    #[serde(default)]
    pub session: SessionConfig,

    /// Tool hosts by id.
    #[serde(default)]
    pub servers: BTreeMap<String, HostAddress>,
}

/// Backend provider configuration.
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    /// "anthropic" or "openai".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model to use. Defaults depend on the provider.
    pub model: Option<String>,

    /// Provider API key. Falls back to the provider's environment variable.
    /// Mutually exclusive with oauth_token.
    pub api_key: Option<String>,

    /// Claude Code OAuth token (sk-ant-oat-...). Anthropic only.
    pub oauth_token: Option<String>,

    /// Endpoint override for compatible servers.
    pub base_url: Option<String>,

    /// Whether the endpoint supports structured tool calling.
    #[serde(default = "default_native_tools")]
    pub native_tools: bool,

    pub max_tokens: Option<u32>,

    /// System prompt.
    pub system: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key: None,
            oauth_token: None,
            base_url: None,
            native_tools: default_native_tools(),
            max_tokens: None,
            system: None,
        }
    }
}

fn default_provider() -> String {
    "anthropic".to_string()
}

fn default_native_tools() -> bool {
    true
}

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string.
    pub fn parse(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Build the model backend, reading API keys from the environment when
    /// the file has none.
    pub fn build_backend(&self) -> Result<CliBackend, ConfigError> {
        let env_key = |var: &str| std::env::var(var).ok();
        match self.backend.provider.as_str() {
            "anthropic" => {
                let auth = self.anthropic_auth(env_key("ANTHROPIC_API_KEY"))?;
                let model = self.backend.model.as_deref().unwrap_or(DEFAULT_ANTHROPIC_MODEL);
                let mut builder = AnthropicBackendBuilder::new(auth, model);
                if let Some(max_tokens) = self.backend.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }
                if let Some(url) = &self.backend.base_url {
                    builder = builder.base_url(url);
                }
                Ok(CliBackend::Anthropic(builder.build()))
            }
            "openai" => {
                if self.backend.oauth_token.is_some() {
                    return Err(ConfigError::Invalid(
                        "oauth_token is only supported for the anthropic provider".into(),
                    ));
                }
                let model = self.backend.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
                let mut builder =
                    OpenAiBackendBuilder::new(model).native_tools(self.backend.native_tools);
                if let Some(key) = self.backend.api_key.clone().or_else(|| env_key("OPENAI_API_KEY")) {
                    builder = builder.api_key(key);
                }
                if let Some(max_tokens) = self.backend.max_tokens {
                    builder = builder.max_tokens(max_tokens);
                }
                if let Some(url) = &self.backend.base_url {
                    builder = builder.base_url(url);
                }
                Ok(CliBackend::OpenAi(builder.build()))
            }
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }

    /// Build the Anthropic authentication.
    ///
    /// Requires exactly one of api_key or oauth_token; `env_key` stands in
    /// for a missing api_key.
    fn anthropic_auth(&self, env_key: Option<String>) -> Result<AnthropicAuth, ConfigError> {
        match (&self.backend.api_key, &self.backend.oauth_token) {
            (Some(key), None) => Ok(AnthropicAuth::ApiKey(key.clone())),
            (None, Some(token)) => Ok(AnthropicAuth::ClaudeCodeOauth(token.clone())),
            (Some(_), Some(_)) => Err(ConfigError::AmbiguousAuth),
            (None, None) => env_key
                .map(AnthropicAuth::ApiKey)
                .ok_or(ConfigError::MissingAuth),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown provider '{0}': expected \"anthropic\" or \"openai\"")]
    UnknownProvider(String),

    #[error("invalid backend config: {0}")]
    Invalid(String),

    #[error(
        "authentication not configured: set backend.api_key, backend.oauth_token, or ANTHROPIC_API_KEY"
    )]
    MissingAuth,

    #[error(
        "ambiguous authentication: set either backend.api_key OR backend.oauth_token, not both"
    )]
    AmbiguousAuth,
}
