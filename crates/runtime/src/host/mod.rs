//! Tool host connector: connections to MCP servers, discovery, and invocation.
//!
//! The connector owns the [`ToolCatalog`] and one transport session per host.
//! Transports are pluggable through [`Dialer`]; [`McpDialer`] speaks MCP over a
//! child process or streamable HTTP.
//!
//! # Example
//!
//! ```ignore
//! use runtime::host::{HostAddress, McpDialer, ToolHostConnector};
//!
//! # async fn example() -> Result<(), runtime::host::HostError> {
//! let mut connector = ToolHostConnector::new(McpDialer);
//! let address = HostAddress::http("http://127.0.0.1:9000/mcp");
//! let handle = connector.connect("weather", &address).await?;
//! for tool in connector.list_tools(&handle).await? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//! connector.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod errors;
mod mcp;

pub use errors::{HostError, TransportError};
pub use mcp::{McpDialer, McpSession};

use crate::catalog::{self, ToolCatalog, ToolDescriptor};
use crate::conversation::{ToolCallRequest, ToolCallResult, content_text};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Default bound on a single tool host operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a tool host lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HostAddress {
    /// A local server spawned as a subprocess, spoken to over stdio.
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// A remote server behind a streamable HTTP endpoint.
    Http { url: String },
}

impl HostAddress {
    pub fn process(
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Process {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self::Http { url: url.into() }
    }
}

impl std::fmt::Display for HostAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process { command, args, .. } if args.is_empty() => write!(f, "{command}"),
            Self::Process { command, args, .. } => write!(f, "{command} {}", args.join(" ")),
            Self::Http { url } => write!(f, "{url}"),
        }
    }
}

/// Raw output of a tool call as reported by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Value,
    /// The host flagged the call as failed.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(&self) -> String {
        content_text(&self.content)
    }
}

/// An established session with one tool host.
pub trait HostSession: Send + Sync {
    fn list_tools(
        &self,
    ) -> impl Future<Output = Result<Vec<ToolDescriptor>, TransportError>> + Send;

    fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> impl Future<Output = Result<ToolOutput, TransportError>> + Send;

    fn ping(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the transport. Dropping a session must release it too.
    fn close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

/// Establishes sessions with tool hosts.
pub trait Dialer: Send + Sync {
    type Session: HostSession;

    /// Open the transport and complete the initialization handshake.
    fn dial(
        &self,
        address: &HostAddress,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// Handle to a connected host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    host: String,
}

impl ConnectionHandle {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.host)
    }
}

/// Manages tool host sessions and the tool catalog.
pub struct ToolHostConnector<D: Dialer> {
    dialer: D,
    sessions: HashMap<String, D::Session>,
    catalog: ToolCatalog,
    timeout: Duration,
}

impl<D: Dialer> ToolHostConnector<D> {
    pub fn new(dialer: D) -> Self {
        Self {
            dialer,
            sessions: HashMap::new(),
            catalog: ToolCatalog::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the bound applied to each connect, discovery, and tool call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Ids of connected hosts.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<_> = self.sessions.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Handle for an already-connected host.
    pub fn handle(&self, host: &str) -> Option<ConnectionHandle> {
        self.sessions.contains_key(host).then(|| ConnectionHandle {
            host: host.to_string(),
        })
    }

    /// Connect to a host. Returns the existing handle if already connected.
    pub async fn connect(
        &mut self,
        host: impl Into<String>,
        address: &HostAddress,
    ) -> Result<ConnectionHandle, HostError> {
        let host = host.into();
        if let Some(handle) = self.handle(&host) {
            tracing::debug!(%host, "already connected");
            return Ok(handle);
        }

        tracing::info!(%host, %address, "connecting to tool host");
        let session = tokio::time::timeout(self.timeout, self.dialer.dial(address))
            .await
            .map_err(|_| HostError::Connection {
                host: host.clone(),
                reason: format!("timed out after {:?}", self.timeout),
            })?
            .map_err(|e| HostError::Connection {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        self.sessions.insert(host.clone(), session);
        Ok(ConnectionHandle { host })
    }

    /// Discover the host's tools and replace its catalog entry.
    ///
    /// On failure the previous entry, if any, is left untouched.
    pub async fn list_tools(
        &mut self,
        handle: &ConnectionHandle,
    ) -> Result<&[ToolDescriptor], HostError> {
        let host = handle.host();
        let session = self.session(handle)?;
        let discovery_error = |reason: String| HostError::Discovery {
            host: host.to_string(),
            reason,
        };

        let tools = tokio::time::timeout(self.timeout, session.list_tools())
            .await
            .map_err(|_| discovery_error(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| discovery_error(e.to_string()))?;
        catalog::validate(&tools).map_err(discovery_error)?;

        tracing::info!(host, count = tools.len(), "discovered tools");
        self.catalog.replace(host, tools);
        Ok(self.catalog.host(host).unwrap_or_default())
    }

    /// Execute one tool on the given host. No retries.
    pub async fn invoke(
        &self,
        handle: &ConnectionHandle,
        name: &str,
        arguments: Value,
    ) -> Result<Value, HostError> {
        if !self.catalog.contains(handle.host(), name) {
            return Err(HostError::ToolNotFound(name.to_string()));
        }
        let session = self.session(handle)?;

        tracing::debug!(host = handle.host(), tool = name, "invoking tool");
        let output = tokio::time::timeout(self.timeout, session.call_tool(name, arguments))
            .await
            .map_err(|_| HostError::Timeout {
                tool: name.to_string(),
                elapsed: self.timeout,
            })?
            .map_err(|e| HostError::Invocation {
                tool: name.to_string(),
                reason: e.to_string(),
            })?;

        if output.is_error {
            return Err(HostError::Invocation {
                tool: name.to_string(),
                reason: output.text(),
            });
        }
        Ok(output.content)
    }

    /// Route a model-issued call to the host that owns the tool.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> Result<ToolCallResult, HostError> {
        let host = self
            .catalog
            .resolve(&request.name)
            .ok_or_else(|| HostError::ToolNotFound(request.name.clone()))?;
        let handle = ConnectionHandle {
            host: host.to_string(),
        };

        let content = self
            .invoke(&handle, &request.name, request.arguments.clone())
            .await?;
        Ok(ToolCallResult {
            call_id: request.id.clone(),
            content,
        })
    }

    /// Check whether the host still answers.
    pub async fn ping(&self, handle: &ConnectionHandle) -> bool {
        let Ok(session) = self.session(handle) else {
            return false;
        };
        matches!(
            tokio::time::timeout(self.timeout, session.ping()).await,
            Ok(Ok(()))
        )
    }

    /// Release a host's transport and forget its tools. Safe to repeat.
    pub async fn disconnect(&mut self, handle: &ConnectionHandle) {
        self.catalog.remove(handle.host());
        if let Some(session) = self.sessions.remove(handle.host()) {
            tracing::info!(host = handle.host(), "disconnecting tool host");
            session.close().await;
        }
    }

    /// Disconnect every host.
    pub async fn shutdown(&mut self) {
        for host in self.hosts() {
            self.disconnect(&ConnectionHandle { host }).await;
        }
    }

    fn session(&self, handle: &ConnectionHandle) -> Result<&D::Session, HostError> {
        self.sessions
            .get(handle.host())
            .ok_or_else(|| HostError::NotConnected(handle.host().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDialer, FakeHost};
    use serde_json::json;

    fn weather() -> FakeHost {
        FakeHost::new().tool("forecast", |args| {
            let city = args["city"].as_str().unwrap_or_default();
            Ok(json!([{"type": "text", "text": format!("sunny in {city}")}]))
        })
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let dialer = FakeDialer::new().host("http://weather", weather());
        let dials = dialer.dial_count();
        let mut connector = ToolHostConnector::new(dialer);
        let address = HostAddress::http("http://weather");

        let first = connector.connect("weather", &address).await.unwrap();
        let second = connector.connect("weather", &address).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(dials.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_failure_is_connection_error() {
        let mut connector = ToolHostConnector::new(FakeDialer::new());
        let err = connector
            .connect("nowhere", &HostAddress::http("http://nowhere"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Connection { .. }));
        assert!(connector.hosts().is_empty());
    }

    #[tokio::test]
    async fn invoke_returns_content() {
        let mut connector = ToolHostConnector::new(FakeDialer::new().host("http://weather", weather()));
        let handle = connector
            .connect("weather", &HostAddress::http("http://weather"))
            .await
            .unwrap();
        connector.list_tools(&handle).await.unwrap();

        let content = connector
            .invoke(&handle, "forecast", json!({"city": "Oslo"}))
            .await
            .unwrap();
        assert_eq!(content[0]["text"], "sunny in Oslo");
    }

    #[tokio::test]
    async fn invoke_unknown_tool_is_not_found() {
        let mut connector = ToolHostConnector::new(FakeDialer::new().host("http://weather", weather()));
        let handle = connector
            .connect("weather", &HostAddress::http("http://weather"))
            .await
            .unwrap();
        connector.list_tools(&handle).await.unwrap();

        let err = connector.invoke(&handle, "rain", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::ToolNotFound(name) if name == "rain"));
    }

    #[tokio::test]
    async fn invoke_before_discovery_is_not_found() {
        let mut connector = ToolHostConnector::new(FakeDialer::new().host("http://weather", weather()));
        let handle = connector
            .connect("weather", &HostAddress::http("http://weather"))
            .await
            .unwrap();

        let err = connector.invoke(&handle, "forecast", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn host_error_flag_is_invocation_error() {
        let host = FakeHost::new().tool("explode", |_| {
            Err(json!([{"type": "text", "text": "boom"}]))
        });
        let mut connector = ToolHostConnector::new(FakeDialer::new().host("http://x", host));
        let handle = connector.connect("x", &HostAddress::http("http://x")).await.unwrap();
        connector.list_tools(&handle).await.unwrap();

        let err = connector.invoke(&handle, "explode", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::Invocation { reason, .. } if reason == "boom"));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let host = FakeHost::new()
            .tool("sleep", |_| Ok(json!("late")))
            .delayed("sleep", Duration::from_secs(10));
        let mut connector = ToolHostConnector::new(FakeDialer::new().host("http://x", host))
            .with_timeout(Duration::from_millis(20));
        let handle = connector.connect("x", &HostAddress::http("http://x")).await.unwrap();
        connector.list_tools(&handle).await.unwrap();

        let err = connector.invoke(&handle, "sleep", json!({})).await.unwrap_err();
        assert!(matches!(err, HostError::Timeout { .. }));
    }

    #[tokio::test]
    async fn malformed_discovery_keeps_previous_entry() {
        let host = FakeHost::new().tool("forecast", |_| Ok(json!("ok")));
        let broken = host.clone();
        let mut connector = ToolHostConnector::new(FakeDialer::new().host("http://x", host));
        let handle = connector.connect("x", &HostAddress::http("http://x")).await.unwrap();
        connector.list_tools(&handle).await.unwrap();

        broken.set_schema("forecast", json!("not an object"));
        let err = connector.list_tools(&handle).await.unwrap_err();

        assert!(matches!(err, HostError::Discovery { .. }));
        assert!(connector.catalog().contains("x", "forecast"));
    }

    #[tokio::test]
    async fn disconnect_is_repeatable() {
        let host = FakeHost::new().tool("forecast", |_| Ok(json!("ok")));
        let closed = host.closed_flag();
        let mut connector = ToolHostConnector::new(FakeDialer::new().host("http://x", host));
        let handle = connector.connect("x", &HostAddress::http("http://x")).await.unwrap();
        connector.list_tools(&handle).await.unwrap();

        connector.disconnect(&handle).await;
        connector.disconnect(&handle).await;

        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(connector.catalog().host("x").is_none());
        assert!(!connector.ping(&handle).await);
        assert!(matches!(
            connector.invoke(&handle, "forecast", json!({})).await,
            Err(HostError::ToolNotFound(_))
        ));
    }

    #[test]
    fn address_from_toml() {
        #[derive(Deserialize)]
        struct Servers {
            servers: HashMap<String, HostAddress>,
        }

        let parsed: Servers = toml::from_str(
            r#"
[servers.weather]
url = "http://127.0.0.1:9000/mcp"

[servers.files]
command = "mcp-server-filesystem"
args = ["/tmp"]
"#,
        )
        .unwrap();

        assert_eq!(
            parsed.servers["weather"],
            HostAddress::http("http://127.0.0.1:9000/mcp")
        );
        assert_eq!(
            parsed.servers["files"],
            HostAddress::process("mcp-server-filesystem", ["/tmp"])
        );
    }
}
