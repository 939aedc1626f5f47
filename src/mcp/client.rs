// MCP Agent — Server Connection
// One connected tool server: spawns the transport, performs the
// `initialize` handshake and `tools/list` discovery, and executes
// `tools/call` requests.

use super::transport::ProcessTransport;
use super::types::*;
use crate::error::{AgentError, AgentResult};
use log::info;
use tokio::sync::watch;

/// MCP protocol version we advertise.
const PROTOCOL_VERSION: &str = "2024-11-05";
/// Handshake deadline (seconds).
const HANDSHAKE_TIMEOUT: u64 = 10;
/// Tool discovery deadline (seconds).
const DISCOVERY_TIMEOUT: u64 = 5;
/// Tool execution deadline (seconds).
const TOOL_CALL_TIMEOUT: u64 = 30;

/// A live connection to a single tool server.
pub struct ServerConnection {
    /// The server config this connection was created from.
    pub config: ToolServerConfig,
    transport: ProcessTransport,
    /// Server identity from the initialize response.
    pub server_info: Option<ServerInfo>,
    /// Tools discovered at connect time.
    pub tools: Vec<ToolDescriptor>,
}

impl ServerConnection {
    /// Spawn the server process, perform the handshake, and discover its
    /// tools. Any failure kills the process before the error propagates.
    pub async fn connect(config: ToolServerConfig) -> AgentResult<Self> {
        info!("[mcp] Connecting to server '{}'", config.id);

        let transport =
            ProcessTransport::spawn(&config.command, &config.args, &config.env).await?;

        let mut conn = ServerConnection {
            config,
            transport,
            server_info: None,
            tools: vec![],
        };

        if let Err(e) = conn.handshake_and_discover().await {
            conn.transport.shutdown().await;
            return Err(e);
        }

        Ok(conn)
    }

    async fn handshake_and_discover(&mut self) -> AgentResult<()> {
        self.initialize().await?;
        self.refresh_tools().await
    }

    /// MCP `initialize` handshake.
    async fn initialize(&mut self) -> AgentResult<()> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            capabilities: serde_json::json!({"tools": {}}),
            client_info: ClientInfo {
                name: "mcp-agent".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        let resp = self
            .transport
            .request(
                "initialize",
                Some(serde_json::to_value(&params)?),
                HANDSHAKE_TIMEOUT,
            )
            .await?;

        if let Some(err) = resp.error {
            return Err(AgentError::rpc("initialize", err.code, &err.message));
        }

        if let Some(result) = resp.result {
            let init: InitializeResult = serde_json::from_value(result)
                .map_err(|e| AgentError::Protocol(format!("Bad initialize result: {}", e)))?;
            info!(
                "[mcp] Server '{}' initialized (protocol={})",
                self.config.id, init.protocol_version
            );
            self.server_info = init.server_info;
        }

        // `initialized` notification is required before normal traffic.
        self.transport
            .notify("notifications/initialized", None)
            .await
    }

    /// Fetch (or refresh) the tool list from the server.
    pub async fn refresh_tools(&mut self) -> AgentResult<()> {
        let resp = self
            .transport
            .request("tools/list", None, DISCOVERY_TIMEOUT)
            .await?;

        if let Some(err) = resp.error {
            // Server may not expose tools at all.
            if err.code == -32601 {
                info!("[mcp] Server '{}' does not expose tools", self.config.id);
                self.tools = vec![];
                return Ok(());
            }
            return Err(AgentError::rpc("tools/list", err.code, &err.message));
        }

        let list: ToolsListResult = match resp.result {
            Some(result) => serde_json::from_value(result)
                .map_err(|e| AgentError::Protocol(format!("Bad tools/list result: {}", e)))?,
            None => ToolsListResult { tools: vec![] },
        };

        info!(
            "[mcp] Server '{}' exposes {} tools",
            self.config.id,
            list.tools.len()
        );

        self.tools = list
            .tools
            .into_iter()
            .map(|t| ToolDescriptor {
                server_id: self.config.id.clone(),
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect();

        Ok(())
    }

    /// Execute one tool on this server. Returns the raw provider result.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> AgentResult<serde_json::Value> {
        let params = ToolCallParams {
            name: tool_name.into(),
            arguments,
        };

        let resp = self
            .transport
            .request(
                "tools/call",
                Some(serde_json::to_value(&params)?),
                TOOL_CALL_TIMEOUT,
            )
            .await?;

        if let Some(err) = resp.error {
            return Err(AgentError::rpc("tools/call", err.code, &err.message));
        }

        resp.result.ok_or_else(|| {
            AgentError::Protocol(format!("tools/call '{}': empty result", tool_name))
        })
    }

    /// Observe process death (for supervision).
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.transport.exit_signal()
    }

    /// Check if the underlying process is still running.
    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    /// Kill the process and reject in-flight requests.
    pub async fn shutdown(&self) {
        info!("[mcp] Shutting down server '{}'", self.config.id);
        self.transport.shutdown().await;
    }
}
