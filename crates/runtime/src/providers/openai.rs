//! OpenAI-compatible Chat Completions backend.

use super::anthropic::status_error;
use crate::catalog::ToolDescriptor;
use crate::conversation::{Message, ToolCallRequest, content_text};
use crate::model::{Backend, ModelError, ModelRequest, ModelResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &'static str, content: &str) -> Self {
        Self {
            role,
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    /// JSON-encoded arguments.
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendBuilder {
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    base_url: String,
    native_tools: bool,
}

impl OpenAiBackendBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            api_key: None,
            model: model.into(),
            max_tokens: 4096,
            base_url: OPENAI_API_URL.to_string(),
            native_tools: true,
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Full URL of the chat completions endpoint.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Declare whether the endpoint supports structured tool calling.
    pub fn native_tools(mut self, enabled: bool) -> Self {
        self.native_tools = enabled;
        self
    }

    pub fn build(self) -> OpenAiBackend {
        OpenAiBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            url: self.base_url,
            native_tools: self.native_tools,
        }
    }
}

/// OpenAI Chat Completions backend (also works with compatible servers).
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    url: String,
    native_tools: bool,
}

impl OpenAiBackend {
    pub fn builder(model: impl Into<String>) -> OpenAiBackendBuilder {
        OpenAiBackendBuilder::new(model)
    }

    fn messages_to_api(system: Option<&str>, messages: &[Message]) -> Vec<ApiMessage> {
        let mut wire: Vec<ApiMessage> = system
            .map(|s| ApiMessage::text("system", s))
            .into_iter()
            .collect();

        for msg in messages {
            match msg {
                Message::UserText { content } => wire.push(ApiMessage::text("user", content)),
                Message::AssistantText { content } => {
                    wire.push(ApiMessage::text("assistant", content))
                }
                Message::AssistantToolCalls { calls } => {
                    let tool_calls = calls
                        .iter()
                        .map(|call| ApiToolCall {
                            id: call.id.clone(),
                            call_type: function_type(),
                            function: ApiFunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.to_string(),
                            },
                        })
                        .collect();
                    // Text spoken in the same turn rides on the same message.
                    match wire.last_mut() {
                        Some(last) if last.role == "assistant" && last.tool_calls.is_empty() => {
                            last.tool_calls = tool_calls
                        }
                        _ => wire.push(ApiMessage {
                            role: "assistant",
                            content: None,
                            tool_calls,
                            tool_call_id: None,
                        }),
                    }
                }
                Message::ToolResult { call_id, content } => wire.push(ApiMessage {
                    role: "tool",
                    content: Some(content_text(content)),
                    tool_calls: Vec::new(),
                    tool_call_id: Some(call_id.clone()),
                }),
            }
        }
        wire
    }

    fn tool_to_api(tool: &ToolDescriptor) -> ApiTool {
        ApiTool {
            tool_type: "function",
            function: ApiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }

    fn response_to_model(response: ApiResponse) -> Result<ModelResponse, ModelError> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;

        let requests = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = if call.function.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&call.function.arguments).map_err(|e| {
                        ModelError::InvalidResponse(format!(
                            "arguments for {} are not JSON: {e}",
                            call.function.name
                        ))
                    })?
                };
                Ok(ToolCallRequest {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        ModelResponse::from_parts(choice.message.content.unwrap_or_default(), requests)
    }
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "openai({}, url={})", self.model, self.url)
    }
}

impl Backend for OpenAiBackend {
    async fn complete(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let tools = if self.native_tools {
            request.tools.iter().map(Self::tool_to_api).collect()
        } else {
            Vec::new()
        };
        let api_request = ApiRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: Self::messages_to_api(request.system, request.messages),
            tools,
        };

        let mut req = self
            .client
            .post(&self.url)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

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

        if let Some(usage) = &api_response.usage {
            tracing::debug!(
                model = %self.model,
                input_tokens = usage.prompt_tokens,
                output_tokens = usage.completion_tokens,
                "openai completion"
            );
        }
        Self::response_to_model(api_response)
    }

    fn supports_tools(&self) -> bool {
        self.native_tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_text_and_calls_share_a_message() {
        let messages = vec![
            Message::user("greet John"),
            Message::assistant("Sure."),
            Message::AssistantToolCalls {
                calls: vec![ToolCallRequest {
                    id: "call_1".into(),
                    name: "greet".into(),
                    arguments: json!({"name": "John"}),
                }],
            },
            Message::ToolResult {
                call_id: "call_1".into(),
                content: json!([{"type": "text", "text": "Hello, John!"}]),
            },
        ];

        let wire =
            serde_json::to_value(OpenAiBackend::messages_to_api(Some("be brief"), &messages))
                .unwrap();
        let wire = wire.as_array().unwrap();
        assert_eq!(wire.len(), 4);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["content"], "Sure.");
        assert_eq!(wire[2]["tool_calls"][0]["function"]["arguments"], r#"{"name":"John"}"#);
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["content"], "Hello, John!");
    }

    #[test]
    fn tool_call_arguments_are_decoded() {
        let response: ApiResponse = serde_json::from_value(json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "greet", "arguments": "{\"name\":\"John\"}"}
                }]
            }}]
        }))
        .unwrap();

        let parsed = OpenAiBackend::response_to_model(response).unwrap();
        let expected = ModelResponse::tool_calls(vec![ToolCallRequest {
            id: "call_1".into(),
            name: "greet".into(),
            arguments: json!({"name": "John"}),
        }]);
        assert_eq!(parsed, expected);
    }

    #[test]
    fn garbled_arguments_are_invalid_response() {
        let response: ApiResponse = serde_json::from_value(json!({
            "choices": [{"message": {
                "tool_calls": [{"id": "c", "function": {"name": "greet", "arguments": "{name:"}}]
            }}]
        }))
        .unwrap();

        let err = OpenAiBackend::response_to_model(response).unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse(_)));
    }

    #[test]
    fn no_choices_is_invalid_response() {
        let response: ApiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(OpenAiBackend::response_to_model(response).is_err());
    }
}
