//! Orchestration loop: one conversation with a model and its tool hosts.

use crate::conversation::{Conversation, Message, ToolCallRequest};
use crate::error::Error;
use crate::host::{ConnectionHandle, Dialer, HostAddress, McpDialer, ToolHostConnector};
use crate::model::{Backend, ModelError, ModelResponse};
use crate::selection::{Selection, SelectionError, ToolSelectionStrategy};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Loop limits and dispatch behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Tool rounds allowed per query.
    pub max_iterations: usize,
    pub tool_timeout_secs: u64,
    /// Run the calls of one model turn concurrently.
    pub parallel_tool_calls: bool,
}

impl SessionConfig {
    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        if self.tool_timeout_secs == 0 {
            return Err(Error::Config("tool_timeout_secs must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tool_timeout_secs: 30,
            parallel_tool_calls: false,
        }
    }
}

/// A query that ended in `Failed`, with everything appended before the failure.
#[derive(Debug, Error)]
#[error("query failed: {error}")]
pub struct QueryFailure {
    #[source]
    pub error: Error,
    pub conversation: Vec<Message>,
}

#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCallRequest>),
    Done,
    Failed(Error),
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            Self::AwaitingModel => "awaiting_model",
            Self::ExecutingTools(_) => "executing_tools",
            Self::Done => "done",
            Self::Failed(_) => "failed",
        }
    }
}

/// A conversation session.
///
/// Owns the model backend, the tool host connections, and the message log.
/// The log persists across queries until the session is dropped.
pub struct Session<B: Backend, D: Dialer = McpDialer> {
    pub id: Uuid,
    backend: B,
    connector: ToolHostConnector<D>,
    selection: Selection,
    conversation: Conversation,
    system: Option<String>,
    config: SessionConfig,
}

impl<B: Backend, D: Dialer> Session<B, D> {
    /// Create a session. The selection strategy follows the backend's
    /// tool-calling support.
    pub fn new(backend: B, dialer: D) -> Self {
        let config = SessionConfig::default();
        let connector = ToolHostConnector::new(dialer)
            .with_timeout(Duration::from_secs(config.tool_timeout_secs));
        Self {
            id: Uuid::new_v4(),
            selection: Selection::for_backend(&backend),
            backend,
            connector,
            conversation: Conversation::new(),
            system: None,
            config,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.connector = self
            .connector
            .with_timeout(Duration::from_secs(config.tool_timeout_secs));
        self.config = config;
        self
    }

    /// Set the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Override the strategy picked from the backend.
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    /// Messages so far, oldest first.
    pub fn conversation(&self) -> &[Message] {
        self.conversation.messages()
    }

    pub fn connector(&self) -> &ToolHostConnector<D> {
        &self.connector
    }

    /// Connect to a tool host and cache its tools.
    pub async fn connect(
        &mut self,
        host: impl Into<String>,
        address: &HostAddress,
    ) -> crate::Result<ConnectionHandle> {
        let handle = self.connector.connect(host, address).await?;
        self.connector.list_tools(&handle).await?;
        Ok(handle)
    }

    /// Run one user query to completion.
    ///
    /// Returns the whole conversation on success. On failure the error comes
    /// back with the conversation as it stood when the loop stopped.
    pub async fn process_query(&mut self, query: &str) -> Result<Vec<Message>, QueryFailure> {
        self.answer_interrupted_calls();
        self.conversation.push(Message::user(query));

        let mut rounds = 0;
        let mut state = LoopState::AwaitingModel;
        loop {
            tracing::debug!(session = %self.id, state = state.name(), rounds, "loop state");
            state = match state {
                LoopState::AwaitingModel => self.await_model(query, &mut rounds).await,
                LoopState::ExecutingTools(calls) => self.execute_tools(&calls).await,
                LoopState::Done => return Ok(self.conversation.to_vec()),
                LoopState::Failed(error) => {
                    tracing::debug!(session = %self.id, %error, "query failed");
                    return Err(QueryFailure {
                        error,
                        conversation: self.conversation.to_vec(),
                    });
                }
            };
        }
    }

    /// Close out calls left without results by a failed or cancelled query.
    ///
    /// Providers reject a tool-call turn that has no matching results.
    fn answer_interrupted_calls(&mut self) {
        for call in self.conversation.unanswered_calls() {
            tracing::debug!(
                session = %self.id,
                call = %call.id,
                tool = %call.name,
                "closing interrupted call"
            );
            self.conversation.push(Message::ToolResult {
                call_id: call.id,
                content: json!(format!("error: {} did not complete", call.name)),
            });
        }
    }

    async fn await_model(&mut self, query: &str, rounds: &mut usize) -> LoopState {
        let tools = self.connector.catalog().flatten();
        let response = self
            .selection
            .select(
                &self.backend,
                self.conversation.messages(),
                &tools,
                self.system.as_deref(),
            )
            .await;

        match response {
            Ok(ModelResponse::FinalText { content }) => {
                self.conversation.push(Message::assistant(content));
                LoopState::Done
            }
            Ok(ModelResponse::ToolCalls { text, requests }) if requests.is_empty() => match text {
                Some(content) => {
                    self.conversation.push(Message::assistant(content));
                    LoopState::Done
                }
                None => LoopState::Failed(
                    ModelError::InvalidResponse("tool call turn without calls".into()).into(),
                ),
            },
            Ok(ModelResponse::ToolCalls { text, requests }) => {
                if *rounds >= self.config.max_iterations {
                    return LoopState::Failed(Error::IterationLimitExceeded {
                        limit: self.config.max_iterations,
                    });
                }
                *rounds += 1;
                if let Some(content) = text {
                    self.conversation.push(Message::assistant(content));
                }
                self.conversation.push(Message::AssistantToolCalls {
                    calls: requests.clone(),
                });
                LoopState::ExecutingTools(requests)
            }
            Err(SelectionError::Invalid(invalid)) => {
                tracing::warn!(
                    session = %self.id,
                    reason = %invalid.reason,
                    raw = %invalid.raw,
                    "unusable tool selection, answering with the query text"
                );
                self.conversation.push(Message::assistant(query));
                LoopState::Done
            }
            Err(SelectionError::Model(e)) => LoopState::Failed(e.into()),
        }
    }

    async fn execute_tools(&mut self, calls: &[ToolCallRequest]) -> LoopState {
        let outcomes = if self.config.parallel_tool_calls {
            join_all(calls.iter().map(|call| self.connector.dispatch(call))).await
        } else {
            let mut outcomes = Vec::with_capacity(calls.len());
            for call in calls {
                let outcome = self.connector.dispatch(call).await;
                let failed = outcome.is_err();
                outcomes.push(outcome);
                if failed {
                    break;
                }
            }
            outcomes
        };

        // Request order; stop at the first failure.
        for outcome in outcomes {
            match outcome {
                Ok(result) => self.conversation.push(result.into()),
                Err(e) => return LoopState::Failed(e.into()),
            }
        }
        LoopState::AwaitingModel
    }

    /// Run `f` against the session, then shut down every host whatever `f`
    /// returned.
    pub async fn scoped<T>(mut self, f: impl AsyncFnOnce(&mut Self) -> T) -> T {
        let out = f(&mut self).await;
        self.close().await;
        out
    }

    /// Disconnect all tool hosts.
    pub async fn close(mut self) {
        tracing::debug!(session = %self.id, "closing session");
        self.connector.shutdown().await;
    }
}
