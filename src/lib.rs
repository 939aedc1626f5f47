// MCP Agent — crate root
// An embeddable agent core: MCP tool-server management over stdio
// JSON-RPC, a policy gate over every tool call, and an orchestrator
// that turns streamed model output into executed tools and a final
// answer.

pub mod builtins;
pub mod error;
pub mod mcp;
pub mod orchestrator;
pub mod policy;
pub mod provider;
pub mod store;
pub mod types;

pub use error::{AgentError, AgentResult};
pub use mcp::{
    parse_mcp_servers_json, ConnectionState, ConnectionStatus, ServerStatus, ToolDescriptor,
    ToolServerConfig, ToolServerManager, TransportKind,
};
pub use orchestrator::{OrchestratorConfig, ToolOrchestrator};
pub use policy::{Decision, PolicyEngine, PolicyRule};
pub use provider::{MockModel, ModelClient};
pub use store::{PersistenceGateway, SqliteStore, ToolLogEntry};
pub use types::{
    EngineEvent, Message, Role, StreamChunk, TokenUsage, ToolCall, ToolCallDelta, ToolDefinition,
    ToolResult,
};
