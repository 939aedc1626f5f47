// MCP Agent — MCP (Model Context Protocol) Types
// Server configuration, JSON-RPC envelopes, and the protocol messages used
// by `initialize`, `tools/list`, and `tools/call`.
// Spec: https://spec.modelcontextprotocol.io/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Server Configuration (persisted) ───────────────────────────────────

/// User-configured tool-server definition — stored through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    /// Unique identifier (user-chosen or taken from the imported mapping).
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Transport type.
    #[serde(default)]
    pub transport: TransportKind,
    /// Command to spawn (process transport).
    #[serde(default)]
    pub command: String,
    /// Arguments for the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables merged into the child process environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Endpoint URL (remote transport; accepted but not connected by core).
    #[serde(default)]
    pub url: String,
    /// HTTP headers (remote transport).
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Whether this server may be connected.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Free-text notes.
    #[serde(default)]
    pub notes: String,
    /// The original configuration payload, preserved verbatim so the
    /// editor can round-trip it.
    #[serde(default)]
    pub raw_config: serde_json::Value,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Process,
    Remote,
}

// ── Connection state (runtime, not a source of truth) ──────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

/// One per server id, owned by the manager. Storage only ever sees the
/// last known status for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// RFC 3339 timestamp of the last successful connect.
    pub connected_at: Option<String>,
    pub error: Option<String>,
}

impl ConnectionState {
    pub fn disconnected() -> Self {
        ConnectionState {
            status: ConnectionStatus::Disconnected,
            connected_at: None,
            error: None,
        }
    }
}

/// Display row for the full server list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub id: String,
    pub name: String,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub tool_count: usize,
}

// ── Tool descriptors (produced by discovery) ───────────────────────────

/// A tool exposed by a server. The name is unique only within its owning
/// server — the catalog layer namespaces it before the model sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server_id: String,
    pub name: String,
    pub description: Option<String>,
    /// JSON Schema describing the tool's input. Opaque to the core.
    pub input_schema: serde_json::Value,
}

// ── JSON-RPC 2.0 Framing ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        JsonRpcRequest {
            jsonrpc: "2.0".into(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// ── MCP Protocol Messages ──────────────────────────────────────────────

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Result of a successful `initialize` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

// ── tools/list ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<WireToolDef>,
}

/// A tool as the server describes it on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireToolDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_empty_schema")]
    pub input_schema: serde_json::Value,
}

fn default_empty_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

// ── tools/call ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

// ── Configuration import ───────────────────────────────────────────────

/// The standard `mcpServers` mapping accepted by the config editor:
/// `{"mcpServers": {"<id>": {"command", "args", "env"} | {"url", "headers"}}}`.
#[derive(Debug, Clone, Deserialize)]
struct McpServersFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: serde_json::Map<String, serde_json::Value>,
}

/// Parse an imported `mcpServers` JSON document into server configs.
/// Each entry's original payload is preserved verbatim in `raw_config`.
pub fn parse_mcp_servers_json(input: &str) -> Result<Vec<ToolServerConfig>, serde_json::Error> {
    let file: McpServersFile = serde_json::from_str(input)?;

    let mut servers = Vec::new();
    for (id, raw) in file.mcp_servers {
        let url = raw
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let transport = if url.is_empty() {
            TransportKind::Process
        } else {
            TransportKind::Remote
        };

        servers.push(ToolServerConfig {
            name: id.clone(),
            id,
            transport,
            command: raw
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            args: raw
                .get("args")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            env: string_map(raw.get("env")),
            url,
            headers: string_map(raw.get("headers")),
            enabled: raw.get("enabled").and_then(|v| v.as_bool()).unwrap_or(true),
            notes: String::new(),
            raw_config: raw,
        });
    }
    Ok(servers)
}

fn string_map(value: Option<&serde_json::Value>) -> HashMap<String, String> {
    value
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let json = r#"{"id":"fs","name":"Filesystem","command":"npx"}"#;
        let cfg: ToolServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.transport, TransportKind::Process);
        assert!(cfg.enabled);
        assert!(cfg.args.is_empty());
        assert!(cfg.env.is_empty());
    }

    #[test]
    fn test_jsonrpc_request_serde() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"tools/list\""));
        assert!(!json.contains("\"params\""));
    }

    #[test]
    fn test_jsonrpc_response_error() {
        let json =
            r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[test]
    fn test_wire_tool_def_camel_case() {
        let json = r#"{"name":"read_file","inputSchema":{"type":"object"}}"#;
        let tool: WireToolDef = serde_json::from_str(json).unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_initialize_params_camel_case() {
        let params = InitializeParams {
            protocol_version: "2024-11-05".into(),
            capabilities: serde_json::json!({"tools": {}}),
            client_info: ClientInfo {
                name: "mcp-agent".into(),
                version: "0.1.0".into(),
            },
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("protocolVersion"));
        assert!(json.contains("clientInfo"));
    }

    #[test]
    fn test_parse_mcp_servers_process() {
        let input = r#"{
            "mcpServers": {
                "filesystem": {
                    "command": "npx",
                    "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"],
                    "env": {"FOO": "bar"}
                }
            }
        }"#;
        let servers = parse_mcp_servers_json(input).unwrap();
        assert_eq!(servers.len(), 1);
        let s = &servers[0];
        assert_eq!(s.id, "filesystem");
        assert_eq!(s.transport, TransportKind::Process);
        assert_eq!(s.command, "npx");
        assert_eq!(s.args.len(), 3);
        assert_eq!(s.env.get("FOO").unwrap(), "bar");
        // Original payload survives for round-trip editing.
        assert_eq!(s.raw_config["command"], "npx");
    }

    #[test]
    fn test_parse_mcp_servers_remote() {
        let input = r#"{
            "mcpServers": {
                "hosted": {
                    "url": "https://mcp.example.com",
                    "headers": {"Authorization": "Bearer x"}
                }
            }
        }"#;
        let servers = parse_mcp_servers_json(input).unwrap();
        assert_eq!(servers[0].transport, TransportKind::Remote);
        assert_eq!(servers[0].url, "https://mcp.example.com");
        assert_eq!(servers[0].headers.get("Authorization").unwrap(), "Bearer x");
    }

    #[test]
    fn test_parse_mcp_servers_bad_json() {
        assert!(parse_mcp_servers_json("{not json").is_err());
    }
}
