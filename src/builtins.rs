// MCP Agent — Builtin Tools
// A small catalog of trivial tools served in-process, used when no tool
// server offers a matching tool. They return canned payloads — real
// side effects belong to tool servers.

use crate::mcp::sanitize_tool_name;
use crate::types::{FunctionDefinition, ToolDefinition};
use serde_json::json;

/// The builtin tool catalog — the in-process variant of the tool-provider
/// dispatch. Catalog names are dotted (the policy table's keys); the model
/// surface gets the sanitized form, same as server tools.
pub struct BuiltinTools;

impl BuiltinTools {
    /// Names of every builtin, as the policy table knows them.
    pub const NAMES: &'static [&'static str] = &[
        "filesystem.read",
        "filesystem.write",
        "playwright.goto",
        "web_search",
    ];

    /// Map a model-facing name back to the catalog name, if any builtin
    /// sanitizes to it.
    pub fn resolve(model_name: &str) -> Option<&'static str> {
        Self::NAMES
            .iter()
            .copied()
            .find(|n| sanitize_tool_name(n) == model_name)
    }

    /// Definitions offered to the model, under model-legal names.
    pub fn definitions() -> Vec<ToolDefinition> {
        let def = |name: &str, description: &str, parameters: serde_json::Value| ToolDefinition {
            tool_type: "function".into(),
            function: FunctionDefinition {
                name: sanitize_tool_name(name),
                description: description.into(),
                parameters,
            },
        };

        vec![
            def(
                "filesystem.read",
                "Read the contents of a file",
                json!({
                    "type": "object",
                    "properties": {
                        "file": {"type": "string", "description": "File path"}
                    },
                    "required": ["file"]
                }),
            ),
            def(
                "filesystem.write",
                "Write content to a file",
                json!({
                    "type": "object",
                    "properties": {
                        "file": {"type": "string", "description": "File path"},
                        "content": {"type": "string", "description": "Content to write"}
                    },
                    "required": ["file", "content"]
                }),
            ),
            def(
                "playwright.goto",
                "Navigate the browser to a URL",
                json!({
                    "type": "object",
                    "properties": {
                        "url": {"type": "string", "description": "URL to open"}
                    },
                    "required": ["url"]
                }),
            ),
            def(
                "web_search",
                "Search the web",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Search query"}
                    },
                    "required": ["query"]
                }),
            ),
        ]
    }

    /// Execute a builtin. Returns `None` for names outside the catalog.
    pub fn execute(name: &str, args: &serde_json::Value) -> Option<serde_json::Value> {
        let result = match name {
            "filesystem.read" => {
                let file = args["file"].as_str().unwrap_or("");
                json!({
                    "success": true,
                    "result": format!("Read file {}", file),
                    "content": format!("Mock contents of {}", file),
                })
            }
            "filesystem.write" => {
                let file = args["file"].as_str().unwrap_or("");
                let written = args["content"].as_str().map(str::len).unwrap_or(0);
                json!({
                    "success": true,
                    "result": format!("Wrote to file {}", file),
                    "bytesWritten": written,
                })
            }
            "playwright.goto" => {
                let url = args["url"].as_str().unwrap_or("");
                json!({
                    "success": true,
                    "result": format!("Navigated to {}", url),
                    "title": "Mock Page Title",
                })
            }
            "web_search" => {
                let query = args["query"].as_str().unwrap_or("");
                json!({
                    "success": true,
                    "result": format!("Searched for \"{}\"", query),
                    "results": [
                        {"title": "Result 1", "url": "https://example.com/1"},
                        {"title": "Result 2", "url": "https://example.com/2"}
                    ],
                })
            }
            _ => return None,
        };
        Some(result)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
