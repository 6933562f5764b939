//! Provider selected at startup from the config file.

use runtime::{AnthropicBackend, Backend, ModelError, ModelRequest, ModelResponse, OpenAiBackend};

pub enum CliBackend {
    Anthropic(AnthropicBackend),
    OpenAi(OpenAiBackend),
}

impl std::fmt::Display for CliBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic(backend) => write!(f, "{backend}"),
            Self::OpenAi(backend) => write!(f, "{backend}"),
        }
    }
}

impl Backend for CliBackend {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        match self {
            Self::Anthropic(backend) => backend.complete(request).await,
            Self::OpenAi(backend) => backend.complete(request).await,
        }
    }

    fn supports_tools(&self) -> bool {
        match self {
            Self::Anthropic(backend) => backend.supports_tools(),
            Self::OpenAi(backend) => backend.supports_tools(),
        }
    }
}
