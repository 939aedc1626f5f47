// MCP Agent — Error Types
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (Config, Process, Protocol…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • Policy denials are NOT errors — they are structured `ToolResult`s the
//     orchestrator folds back into the conversation.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AgentError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Server registry / launch configuration is invalid or missing
    /// (unknown server, disabled server, unsupported transport).
    #[error("Configuration error: {0}")]
    Config(String),

    /// External tool-server process failed to spawn or died.
    #[error("Process error: {0}")]
    Process(String),

    /// Malformed wire frame, JSON-RPC error payload, or unmatched id.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A handshake / discovery / execution deadline was exceeded.
    #[error("{method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    /// The requested tool exists on no connected server and is not a builtin.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// AI model / provider failure (non-secret detail only).
    #[error("Model error: {0}")]
    Model(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl AgentError {
    /// Create a timeout error for a JSON-RPC method.
    pub fn timeout(method: impl Into<String>, secs: u64) -> Self {
        Self::Timeout { method: method.into(), secs }
    }

    /// Create a protocol error from a JSON-RPC error payload.
    pub fn rpc(method: &str, code: i64, message: &str) -> Self {
        Self::Protocol(format!("{} failed: {} (code={})", method, message, code))
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type AgentResult<T> = Result<T, AgentError>;

// ── Conversion: AgentError → String ────────────────────────────────────────
// Lets host-app command boundaries call `.map_err(AgentError::into)` directly.

impl From<AgentError> for String {
    fn from(e: AgentError) -> Self {
        e.to_string()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
