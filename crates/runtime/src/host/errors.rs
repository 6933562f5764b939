use std::time::Duration;
use thiserror::Error;

/// Errors from tool host connections and invocations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// The transport could not be established or the handshake failed.
    #[error("failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    /// Tool discovery failed or returned malformed data.
    #[error("tool discovery failed for {host}: {reason}")]
    Discovery { host: String, reason: String },

    /// The tool is not in the cached catalog.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The host raised an error while executing the tool.
    #[error("tool {tool} failed: {reason}")]
    Invocation { tool: String, reason: String },

    /// No response within the configured bound.
    #[error("tool {tool} timed out after {elapsed:?}")]
    Timeout { tool: String, elapsed: Duration },

    /// The handle does not refer to a connected host.
    #[error("host not connected: {0}")]
    NotConnected(String),
}

/// Failure reported by a transport session, before the connector attaches
/// host and tool context.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;
