use super::errors::ModelError;
use crate::catalog::ToolDescriptor;
use crate::conversation::{Message, ToolCallRequest};
use std::future::Future;

/// Everything needed for a model request.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub messages: &'a [Message],
    pub tools: &'a [ToolDescriptor],
    pub system: Option<&'a str>,
}

impl<'a> ModelRequest<'a> {
    pub fn new(messages: &'a [Message]) -> Self {
        Self {
            messages,
            tools: &[],
            system: None,
        }
    }

    pub fn with_tools(mut self, tools: &'a [ToolDescriptor]) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system(mut self, system: Option<&'a str>) -> Self {
        self.system = system;
        self
    }
}

/// What the model decided to do with its turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    /// A plain-text answer; the turn is over.
    FinalText { content: String },
    /// One or more tool invocations, optionally preceded by free text.
    ToolCalls {
        text: Option<String>,
        requests: Vec<ToolCallRequest>,
    },
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self::FinalText {
            content: content.into(),
        }
    }

    pub fn tool_calls(requests: Vec<ToolCallRequest>) -> Self {
        Self::ToolCalls {
            text: None,
            requests,
        }
    }

    /// Build a response from the text and tool-call blocks of one model turn.
    ///
    /// Any tool call makes this a `ToolCalls` response; blank text is dropped.
    pub fn from_parts(text: String, requests: Vec<ToolCallRequest>) -> Result<Self, ModelError> {
        let text = (!text.trim().is_empty()).then_some(text);
        match (text, requests.is_empty()) {
            (text, false) => Ok(Self::ToolCalls { text, requests }),
            (Some(content), true) => Ok(Self::FinalText { content }),
            (None, true) => Err(ModelError::InvalidResponse(
                "response had neither text nor tool calls".into(),
            )),
        }
    }
}

/// Trait for LLM provider backends.
///
/// A backend performs exactly one request/response exchange per call and keeps
/// no conversation state between calls.
pub trait Backend: Send + Sync {
    fn complete(
        &self,
        request: ModelRequest<'_>,
    ) -> impl Future<Output = Result<ModelResponse, ModelError>> + Send;

    /// Whether the endpoint accepts tool definitions and returns structured
    /// tool calls.
    fn supports_tools(&self) -> bool {
        true
    }
}
