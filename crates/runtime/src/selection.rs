//! Tool selection strategies.
//!
//! Endpoints with native tool calling get the catalog as structured tool
//! definitions ([`NativeSelection`]). Endpoints without it are asked, in plain
//! text, to pick one tool and its arguments as a JSON object
//! ([`PromptedSelection`]); that reply is untrusted and parsed strictly.

use crate::catalog::ToolDescriptor;
use crate::conversation::{Message, ToolCallRequest, content_text};
use crate::model::{Backend, ModelError, ModelRequest, ModelResponse};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use thiserror::Error;
use uuid::Uuid;

/// The model's reply could not be turned into a valid tool call.
#[derive(Debug, Clone, Error)]
#[error("invalid tool selection: {reason}")]
pub struct InvalidSelection {
    pub reason: String,
    /// The raw model text, for diagnostics.
    pub raw: String,
}

impl InvalidSelection {
    fn new(reason: impl Into<String>, raw: &str) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Invalid(#[from] InvalidSelection),
}

/// Decides how the model is asked for its next move.
pub trait ToolSelectionStrategy: Send + Sync {
    fn select<B: Backend>(
        &self,
        backend: &B,
        conversation: &[Message],
        tools: &[ToolDescriptor],
        system: Option<&str>,
    ) -> impl Future<Output = Result<ModelResponse, SelectionError>> + Send;
}

/// Pass the catalog to the endpoint and let it return structured tool calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSelection;

impl ToolSelectionStrategy for NativeSelection {
    async fn select<B: Backend>(
        &self,
        backend: &B,
        conversation: &[Message],
        tools: &[ToolDescriptor],
        system: Option<&str>,
    ) -> Result<ModelResponse, SelectionError> {
        let request = ModelRequest::new(conversation)
            .with_tools(tools)
            .with_system(system);
        Ok(backend.complete(request).await?)
    }
}

/// Ask for a tool choice in plain text and parse the reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptedSelection;

impl ToolSelectionStrategy for PromptedSelection {
    async fn select<B: Backend>(
        &self,
        backend: &B,
        conversation: &[Message],
        tools: &[ToolDescriptor],
        system: Option<&str>,
    ) -> Result<ModelResponse, SelectionError> {
        // Nothing to choose from: plain chat.
        if tools.is_empty() {
            let request = ModelRequest::new(conversation).with_system(system);
            return Ok(backend.complete(request).await?);
        }

        let prompt = [Message::user(selection_prompt(conversation, tools))];
        let request = ModelRequest::new(&prompt).with_system(system);
        match backend.complete(request).await? {
            ModelResponse::FinalText { content } => Ok(parse_selection(&content, tools)?),
            native @ ModelResponse::ToolCalls { .. } => Ok(native),
        }
    }
}

/// Strategy chosen per session from the backend's capabilities.
#[derive(Debug, Clone, Copy)]
pub enum Selection {
    Native(NativeSelection),
    Prompted(PromptedSelection),
}

impl Selection {
    pub fn for_backend<B: Backend>(backend: &B) -> Self {
        if backend.supports_tools() {
            Self::Native(NativeSelection)
        } else {
            Self::Prompted(PromptedSelection)
        }
    }

    pub fn is_prompted(&self) -> bool {
        matches!(self, Self::Prompted(_))
    }
}

impl ToolSelectionStrategy for Selection {
    async fn select<B: Backend>(
        &self,
        backend: &B,
        conversation: &[Message],
        tools: &[ToolDescriptor],
        system: Option<&str>,
    ) -> Result<ModelResponse, SelectionError> {
        match self {
            Self::Native(s) => s.select(backend, conversation, tools, system).await,
            Self::Prompted(s) => s.select(backend, conversation, tools, system).await,
        }
    }
}

/// Build the plain-text instruction for endpoints without tool calling.
///
/// The conversation is rendered with role labels so the model keeps context.
pub fn selection_prompt(conversation: &[Message], tools: &[ToolDescriptor]) -> String {
    let catalog = serde_json::to_string_pretty(tools).unwrap_or_default();

    let mut transcript = Vec::new();
    for msg in conversation {
        match msg {
            Message::UserText { content } => transcript.push(format!("[User]\n{content}")),
            Message::AssistantText { content } => {
                transcript.push(format!("[Assistant]\n{content}"))
            }
            Message::AssistantToolCalls { calls } => {
                for call in calls {
                    transcript.push(format!(
                        "[Tool call {}]\n{} {}",
                        call.id, call.name, call.arguments
                    ));
                }
            }
            Message::ToolResult { call_id, content } => {
                transcript.push(format!("[Tool result {call_id}]\n{}", content_text(content)))
            }
        }
    }

    format!(
        "You can use the following tools:\n{catalog}\n\n\
         Conversation so far:\n{}\n\n\
         Reply with exactly one JSON object and nothing else.\n\
         To call a tool: {{\"tool\": \"<tool name>\", \"arguments\": {{...}}}}\n\
         To answer the user directly: {{\"answer\": \"<your reply>\"}}",
        transcript.join("\n\n")
    )
}

#[derive(Debug, Deserialize)]
struct RawSelection {
    #[serde(default, alias = "selected_tool")]
    tool: Option<String>,
    #[serde(default, alias = "parameters")]
    arguments: Option<Value>,
    #[serde(default)]
    answer: Option<String>,
}

/// Parse a prompted selection reply.
///
/// Accepts one JSON object, optionally wrapped in a markdown fence or
/// prefixed with a `json` label. Never evaluates the text.
pub fn parse_selection(
    text: &str,
    tools: &[ToolDescriptor],
) -> Result<ModelResponse, InvalidSelection> {
    let body = strip_fences(text);
    let raw: RawSelection = serde_json::from_str(body)
        .map_err(|e| InvalidSelection::new(format!("not a JSON selection object: {e}"), text))?;

    match (raw.tool, raw.answer) {
        (Some(name), None) => {
            if !tools.iter().any(|t| t.name == name) {
                return Err(InvalidSelection::new(
                    format!("unknown tool {name:?}"),
                    text,
                ));
            }
            let arguments = match raw.arguments {
                None | Some(Value::Null) => Value::Object(Default::default()),
                Some(args @ Value::Object(_)) => args,
                Some(other) => {
                    return Err(InvalidSelection::new(
                        format!("arguments must be an object, got {other}"),
                        text,
                    ));
                }
            };
            Ok(ModelResponse::tool_calls(vec![ToolCallRequest {
                id: format!("sel-{}", Uuid::new_v4().simple()),
                name,
                arguments,
            }]))
        }
        (None, Some(answer)) => Ok(ModelResponse::text(answer)),
        (Some(_), Some(_)) => Err(InvalidSelection::new(
            "both a tool and an answer were given",
            text,
        )),
        (None, None) => Err(InvalidSelection::new("neither a tool nor an answer", text)),
    }
}

fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    if body.get(..4).is_some_and(|label| label.eq_ignore_ascii_case("json")) {
        body = body[4..].trim_start();
    }
    body
}
