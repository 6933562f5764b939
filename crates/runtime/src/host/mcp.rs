//! MCP transport using the official rmcp SDK.

use super::{Dialer, HostAddress, HostSession, ToolOutput, TransportError};
use crate::catalog::ToolDescriptor;
use rmcp::{
    RoleClient, ServiceExt,
    model::{
        CallToolRequestParams, ClientCapabilities, ClientInfo, ClientRequest, Implementation,
        PingRequest, Tool,
    },
    service::RunningService,
    transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess},
};
use serde_json::Value;
use tokio::process::Command;

/// Name reported to servers during the initialize handshake.
const CLIENT_NAME: &str = "tether";

/// Dials MCP servers over a child process or streamable HTTP.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpDialer;

impl McpDialer {
    fn client_info(&self) -> ClientInfo {
        ClientInfo {
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Implementation::from_build_env()
            },
            ..Default::default()
        }
    }
}

impl Dialer for McpDialer {
    type Session = McpSession;

    async fn dial(&self, address: &HostAddress) -> Result<McpSession, TransportError> {
        let service = match address {
            HostAddress::Process { command, args, env } => {
                let transport = TokioChildProcess::new(Command::new(command).configure(|cmd| {
                    cmd.args(args).envs(env);
                }))?;
                self.client_info().serve(transport).await?
            }
            HostAddress::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                self.client_info().serve(transport).await?
            }
        };

        if let Some(info) = service.peer_info() {
            tracing::debug!(
                server = %info.server_info.name,
                version = %info.server_info.version,
                "initialized MCP session"
            );
        }
        Ok(McpSession { service })
    }
}

/// A running MCP client session.
///
/// Dropping it cancels the service; child processes are killed with it.
pub struct McpSession {
    service: RunningService<RoleClient, ClientInfo>,
}

impl HostSession for McpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let response = self.service.list_tools(Default::default()).await?;
        Ok(response.tools.into_iter().map(ToolDescriptor::from).collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, TransportError> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => return Err(format!("arguments must be a JSON object, got {other}").into()),
        };
        let params = CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments,
            task: None,
        };

        let result = self.service.call_tool(params).await?;
        Ok(ToolOutput {
            content: serde_json::to_value(&result.content)?,
            is_error: result.is_error.unwrap_or(false),
        })
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.service
            .send_request(ClientRequest::PingRequest(PingRequest::default()))
            .await?;
        Ok(())
    }

    async fn close(self) {
        if let Err(e) = self.service.cancel().await {
            tracing::warn!("MCP session did not shut down cleanly: {e}");
        }
    }
}

impl From<Tool> for ToolDescriptor {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
            input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        }
    }
}
