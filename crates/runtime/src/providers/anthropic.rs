//! Anthropic Messages API backend.

use crate::catalog::ToolDescriptor;
use crate::conversation::{Message, ToolCallRequest, content_text};
use crate::model::{Backend, ModelError, ModelRequest, ModelResponse};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Claude Code OAuth constants
const CLAUDE_CODE_VERSION: &str = "2.1.2";
const OAUTH_BETA_HEADER: &str = "claude-code-20250219,oauth-2025-04-20,fine-grained-tool-streaming-2025-05-14,interleaved-thinking-2025-05-14";
const OAUTH_SYSTEM_PREFIX: &str = "You are Claude Code, Anthropic's official CLI for Claude.";

/// Authentication mode for Anthropic API.
///
/// Use `ApiKey` for standard API keys (`sk-ant-api01-...`).
/// Use `ClaudeCodeOauth` for OAuth tokens from Claude Code CLI (`sk-ant-oat-...`).
#[derive(Debug, Clone)]
pub enum AnthropicAuth {
    /// Standard API key authentication.
    ApiKey(String),
    /// Claude Code OAuth token authentication.
    ClaudeCodeOauth(String),
}

impl std::fmt::Display for AnthropicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey(_) => write!(f, "api_key"),
            Self::ClaudeCodeOauth(_) => write!(f, "claude_code_oauth"),
        }
    }
}

impl AnthropicAuth {
    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self {
            Self::ApiKey(key) => req.header("x-api-key", key),
            Self::ClaudeCodeOauth(token) => req
                .header("anthropic-dangerous-direct-browser-access", "true")
                .header("Authorization", format!("Bearer {token}"))
                .header("anthropic-beta", OAUTH_BETA_HEADER)
                .header(
                    "user-agent",
                    format!("claude-cli/{CLAUDE_CODE_VERSION} (external, cli)"),
                )
                .header("x-app", "cli"),
        }
    }

    fn build_system(&self, system: Option<&str>) -> Option<ApiSystemPrompt> {
        match self {
            Self::ApiKey(_) => system.map(|s| ApiSystemPrompt::Simple(s.to_string())),
            Self::ClaudeCodeOauth(_) => {
                let blocks = std::iter::once(OAUTH_SYSTEM_PREFIX)
                    .chain(system)
                    .map(|text| ApiSystemBlock {
                        block_type: "text",
                        text: text.to_string(),
                        cache_control: ApiCacheControl {
                            control_type: "ephemeral",
                        },
                    })
                    .collect();
                Some(ApiSystemPrompt::Blocks(blocks))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<ApiSystemPrompt>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ApiSystemPrompt {
    Simple(String),
    Blocks(Vec<ApiSystemBlock>),
}

#[derive(Debug, Serialize)]
struct ApiSystemBlock {
    #[serde(rename = "type")]
    block_type: &'static str,
    text: String,
    cache_control: ApiCacheControl,
}

#[derive(Debug, Serialize)]
struct ApiCacheControl {
    #[serde(rename = "type")]
    control_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiResponseBlock>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an Anthropic backend.
#[derive(Debug, Clone)]
pub struct AnthropicBackendBuilder {
    auth: AnthropicAuth,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicBackendBuilder {
    pub fn new(auth: AnthropicAuth, model: impl Into<String>) -> Self {
        Self {
            auth,
            model: model.into(),
            max_tokens: 4096,
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the messages endpoint (proxies, gateways).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn build(self) -> AnthropicBackend {
        AnthropicBackend {
            client: reqwest::Client::new(),
            auth: self.auth,
            model: self.model,
            max_tokens: self.max_tokens,
            url: self.base_url,
        }
    }
}

/// Anthropic API backend.
pub struct AnthropicBackend {
    client: reqwest::Client,
    auth: AnthropicAuth,
    model: String,
    max_tokens: u32,
    url: String,
}

impl AnthropicBackend {
    pub fn builder(auth: AnthropicAuth, model: impl Into<String>) -> AnthropicBackendBuilder {
        AnthropicBackendBuilder::new(auth, model)
    }

    fn message_to_api(msg: &Message) -> (&'static str, Vec<ApiContentBlock>) {
        match msg {
            Message::UserText { content } => (
                "user",
                vec![ApiContentBlock::Text {
                    text: content.clone(),
                }],
            ),
            Message::AssistantText { content } => (
                "assistant",
                vec![ApiContentBlock::Text {
                    text: content.clone(),
                }],
            ),
            Message::AssistantToolCalls { calls } => (
                "assistant",
                calls
                    .iter()
                    .map(|call| ApiContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    })
                    .collect(),
            ),
            Message::ToolResult { call_id, content } => (
                "user",
                vec![ApiContentBlock::ToolResult {
                    tool_use_id: call_id.clone(),
                    content: content_text(content),
                }],
            ),
        }
    }

    /// Convert the conversation into wire turns.
    ///
    /// Adjacent messages with the same role share one turn, so assistant text
    /// and its tool calls travel together and consecutive tool results form a
    /// single user turn.
    fn messages_to_api(messages: &[Message]) -> Vec<ApiMessage> {
        let mut turns: Vec<ApiMessage> = Vec::new();
        for msg in messages {
            let (role, blocks) = Self::message_to_api(msg);
            match turns.last_mut() {
                Some(turn) if turn.role == role => turn.content.extend(blocks),
                _ => turns.push(ApiMessage {
                    role,
                    content: blocks,
                }),
            }
        }
        turns
    }

    fn tool_to_api(tool: &ToolDescriptor) -> ApiTool {
        ApiTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.input_schema.clone(),
        }
    }

    fn response_to_model(blocks: Vec<ApiResponseBlock>) -> Result<ModelResponse, ModelError> {
        let mut text = String::new();
        let mut requests = Vec::new();
        for block in blocks {
            match block {
                ApiResponseBlock::Text { text: t } => text.push_str(&t),
                ApiResponseBlock::ToolUse { id, name, input } => {
                    requests.push(ToolCallRequest {
                        id,
                        name,
                        arguments: input,
                    })
                }
                ApiResponseBlock::Unknown => {}
            }
        }
        ModelResponse::from_parts(text, requests)
    }
}

pub(crate) fn status_error(status: StatusCode, body: String) -> ModelError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        ModelError::RateLimited(body)
    } else {
        ModelError::Api(format!("{status}: {body}"))
    }
}

impl std::fmt::Display for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "anthropic({}, auth={})", self.model, self.auth)
    }
}

impl Backend for AnthropicBackend {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let api_request = ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: Self::messages_to_api(request.messages),
            system: self.auth.build_system(request.system),
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
        };

        let req = self
            .client
            .post(&self.url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .header("accept", "application/json");

        let req = self.auth.apply_headers(req);

        let response = req
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        tracing::debug!(
            model = %self.model,
            input_tokens = api_response.usage.input_tokens,
            output_tokens = api_response.usage.output_tokens,
            "anthropic completion"
        );
        Self::response_to_model(api_response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_display() {
        let api = AnthropicAuth::ApiKey("test".into());
        let oauth = AnthropicAuth::ClaudeCodeOauth("test".into());
        assert_eq!(api.to_string(), "api_key");
        assert_eq!(oauth.to_string(), "claude_code_oauth");
    }

    #[test]
    fn oauth_system_gets_prefix_block() {
        let oauth = AnthropicAuth::ClaudeCodeOauth("t".into());
        let system = serde_json::to_value(oauth.build_system(Some("be brief"))).unwrap();
        assert_eq!(system[0]["text"], OAUTH_SYSTEM_PREFIX);
        assert_eq!(system[1]["text"], "be brief");
    }

    #[test]
    fn tool_round_coalesces_into_turns() {
        let messages = vec![
            Message::user("weather in Oslo and Rome?"),
            Message::assistant("Checking both."),
            Message::AssistantToolCalls {
                calls: vec![
                    ToolCallRequest {
                        id: "a".into(),
                        name: "forecast".into(),
                        arguments: json!({"city": "Oslo"}),
                    },
                    ToolCallRequest {
                        id: "b".into(),
                        name: "forecast".into(),
                        arguments: json!({"city": "Rome"}),
                    },
                ],
            },
            Message::ToolResult {
                call_id: "a".into(),
                content: json!([{"type": "text", "text": "snow"}]),
            },
            Message::ToolResult {
                call_id: "b".into(),
                content: json!("sun"),
            },
        ];

        let wire = serde_json::to_value(AnthropicBackend::messages_to_api(&messages)).unwrap();
        let turns = wire.as_array().unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1]["role"], "assistant");
        assert_eq!(turns[1]["content"][0]["type"], "text");
        assert_eq!(turns[1]["content"][1]["type"], "tool_use");
        assert_eq!(turns[1]["content"][2]["input"]["city"], "Rome");
        assert_eq!(turns[2]["role"], "user");
        assert_eq!(turns[2]["content"][0]["tool_use_id"], "a");
        assert_eq!(turns[2]["content"][0]["content"], "snow");
        assert_eq!(turns[2]["content"][1]["content"], "sun");
    }

    #[test]
    fn response_with_tool_use_is_tool_calls() {
        let blocks: Vec<ApiResponseBlock> = serde_json::from_value(json!([
            {"type": "text", "text": "Let me check."},
            {"type": "tool_use", "id": "toolu_1", "name": "forecast", "input": {"city": "Oslo"}},
            {"type": "thinking", "thinking": "..."}
        ]))
        .unwrap();

        match AnthropicBackend::response_to_model(blocks).unwrap() {
            ModelResponse::ToolCalls { text, requests } => {
                assert_eq!(text.as_deref(), Some("Let me check."));
                assert_eq!(requests[0].id, "toolu_1");
                assert_eq!(requests[0].arguments["city"], "Oslo");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rate_limit_status_is_distinct() {
        let err = status_error(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, ModelError::RateLimited(_)));
        let err = status_error(StatusCode::BAD_REQUEST, "bad".into());
        assert!(matches!(err, ModelError::Api(_)));
    }
}
