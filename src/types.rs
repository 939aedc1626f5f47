// MCP Agent — Core types
// These are the data structures that flow through the whole engine.
// They are independent of any specific AI provider.

use crate::policy::Decision;
use serde::{Deserialize, Serialize};

// ── Messages ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

// ── Tool Calling ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON string, accumulated from streaming fragments.
    pub arguments: String,
}

/// A tool offered to the model (OpenAI function-calling shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's input.
    pub parameters: serde_json::Value,
}

// ── Tool Execution Result ──────────────────────────────────────────────

/// The uniform wrapper for every tool outcome, regardless of whether it
/// came from a tool server, a builtin, or the policy gate itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub output: String,
    pub success: bool,
    /// The policy decision that produced this result.
    pub decision: Decision,
}

// ── Streaming Events (engine → caller) ─────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EngineEvent {
    /// A text delta from the model's response stream.
    #[serde(rename = "delta")]
    Delta { session_id: String, text: String },
    /// The model requested a tool call (emitted before the policy gate).
    #[serde(rename = "tool_request")]
    ToolRequest {
        session_id: String,
        tool_call: ToolCall,
    },
    /// A tool call finished (executed, denied, or pending confirmation).
    #[serde(rename = "tool_result")]
    ToolResultEvent {
        session_id: String,
        result: ToolResult,
    },
    /// The full assistant turn is complete.
    #[serde(rename = "complete")]
    Complete {
        session_id: String,
        text: String,
        tool_calls_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    /// An error occurred during the run.
    #[serde(rename = "error")]
    Error { session_id: String, message: String },
}

// ── Provider API response shapes ───────────────────────────────────────

/// Unified streaming chunk from any provider.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta_text: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// An incremental fragment of a function-call description. Fragments for
/// the same index are merged in arrival order by the orchestrator.
#[derive(Debug, Clone)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub function_name: Option<String>,
    pub arguments_delta: Option<String>,
}

/// Token usage reported by the API (for metering).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serde_skips_empty_fields() {
        let msg = Message::user("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }

    #[test]
    fn test_tool_call_serde_type_field() {
        let tc = ToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "web_search".into(),
                arguments: "{\"query\":\"rust\"}".into(),
            },
        };
        let json = serde_json::to_string(&tc).unwrap();
        assert!(json.contains("\"type\":\"function\""));
    }

    #[test]
    fn test_engine_event_tagged() {
        let ev = EngineEvent::Delta {
            session_id: "s1".into(),
            text: "hello".into(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"kind\":\"delta\""));
    }
}
