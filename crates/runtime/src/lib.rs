//! Tether runtime: drives a model through tool calls served by MCP hosts.
//!
//! This crate provides the orchestration loop that sits between a language
//! model endpoint and a set of tool hosts, along with the pieces it is built
//! from.
//!
//! # Overview
//!
//! - **Session**: owns one conversation, its model backend, and its tool host
//!   connections; runs the query loop.
//! - **Backend**: a trait abstracting model providers (Anthropic, OpenAI).
//! - **ToolHostConnector**: connects to MCP servers, caches their tools in a
//!   [`ToolCatalog`], and routes calls.
//! - **Selection**: native tool calling, or a prompted JSON selection for
//!   endpoints without it.
//!
//! # Example
//!
//! ```ignore
//! use runtime::{AnthropicAuth, AnthropicBackend, HostAddress, McpDialer, Session};
//!
//! # async fn example() -> runtime::Result<()> {
//! let auth = AnthropicAuth::ApiKey("sk-ant-api01-...".into());
//! let backend = AnthropicBackend::builder(auth, "claude-sonnet-4-20250514").build();
//!
//! let mut session = Session::new(backend, McpDialer);
//! session
//!     .connect("weather", &HostAddress::http("http://127.0.0.1:9000/mcp"))
//!     .await?;
//!
//! match session.process_query("Will it rain in Oslo?").await {
//!     Ok(conversation) => println!("{:?}", conversation.last()),
//!     Err(failure) => eprintln!("{}", failure.error),
//! }
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod conversation;
mod error;
pub mod host;
pub mod model;
pub mod providers;
pub mod selection;
mod session;

#[cfg(test)]
mod testing;

pub use catalog::{ToolCatalog, ToolDescriptor};
pub use conversation::{Conversation, Message, ToolCallRequest, ToolCallResult};
pub use error::{Error, ErrorKind, Result};
pub use host::{ConnectionHandle, HostAddress, HostError, McpDialer, ToolHostConnector};
pub use model::{Backend, ModelError, ModelRequest, ModelResponse};
pub use providers::{AnthropicAuth, AnthropicBackend, OpenAiBackend};
pub use selection::{InvalidSelection, Selection};
pub use session::{QueryFailure, Session, SessionConfig};
