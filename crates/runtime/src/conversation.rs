//! Conversation state: the ordered message log that drives every model call.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within the turn; used to correlate the result.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// The output of one tool call, matched back to its request by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub call_id: String,
    pub content: Value,
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    UserText { content: String },
    AssistantText { content: String },
    AssistantToolCalls { calls: Vec<ToolCallRequest> },
    ToolResult { call_id: String, content: Value },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self::UserText {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::AssistantText {
            content: content.into(),
        }
    }

    /// Text content, if this is a plain text message.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::UserText { content } | Self::AssistantText { content } => Some(content),
            _ => None,
        }
    }
}

impl From<ToolCallResult> for Message {
    fn from(result: ToolCallResult) -> Self {
        Self::ToolResult {
            call_id: result.call_id,
            content: result.content,
        }
    }
}

/// Render tool result content as text.
///
/// Arrays of MCP text blocks are joined by newlines; other content is
/// rendered as JSON.
pub fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) if blocks.iter().all(|b| b.get("text").is_some()) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Append-only, ordered record of a session's messages.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Calls from the latest tool-call turn that have no result yet.
    ///
    /// Non-empty only when a query stopped before its tools finished.
    pub fn unanswered_calls(&self) -> Vec<ToolCallRequest> {
        let Some(turn) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::AssistantToolCalls { .. }))
        else {
            return Vec::new();
        };
        let Message::AssistantToolCalls { calls } = &self.messages[turn] else {
            return Vec::new();
        };

        let answered: Vec<&str> = self.messages[turn + 1..]
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        calls
            .iter()
            .filter(|call| !answered.contains(&call.id.as_str()))
            .cloned()
            .collect()
    }

    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.clone()
    }
}
