// MCP Agent — MCP subsystem
// Process transport, request correlation, per-server connections, and the
// server manager.

pub mod client;
pub mod correlator;
pub mod manager;
pub mod transport;
pub mod types;

pub use client::ServerConnection;
pub use manager::{model_tool_name, sanitize_tool_name, ToolServerManager};
pub use transport::ProcessTransport;
pub use types::{
    parse_mcp_servers_json, ConnectionState, ConnectionStatus, ServerStatus, ToolDescriptor,
    ToolServerConfig, TransportKind,
};
