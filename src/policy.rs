// MCP Agent — Policy Engine
// Maps tool name → decision, with contextual overrides layered on top of
// the static rule table. Every tool invocation goes through `evaluate`
// before any server is contacted.

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The policy outcome for a tool invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    RequireConfirmation,
}

/// A named rule, as returned by `list_rules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub tool: String,
    pub decision: Decision,
}

/// Operation names that are denied unconditionally, regardless of any
/// configured rule.
const DENYLIST: &[&str] = &[
    "system.exec",
    "process.kill",
    "network.request",
    "database.drop",
    "user.delete",
];

/// Path fragments that indicate an attempt to escape the sandbox.
const DANGEROUS_PATHS: &[&str] = &["../", "..\\", "/etc/", "C:\\Windows\\", "/System/"];

/// Process-wide policy rule table. Shared via `Arc`; mutation is
/// synchronous and takes effect on the next evaluation.
pub struct PolicyEngine {
    rules: Mutex<HashMap<String, Decision>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Create an engine pre-loaded with the default rule set.
    pub fn new() -> Self {
        let engine = PolicyEngine {
            rules: Mutex::new(HashMap::new()),
        };
        engine.setup_default_rules();
        engine
    }

    /// Create an engine with an empty rule table (everything denied).
    pub fn empty() -> Self {
        PolicyEngine {
            rules: Mutex::new(HashMap::new()),
        }
    }

    fn setup_default_rules(&self) {
        let defaults: &[(&str, Decision)] = &[
            // Builtin mock tools
            ("filesystem.read", Decision::Allow),
            ("filesystem.write", Decision::RequireConfirmation),
            ("filesystem.delete", Decision::RequireConfirmation),
            ("playwright.goto", Decision::RequireConfirmation),
            ("playwright.click", Decision::RequireConfirmation),
            ("playwright.type", Decision::RequireConfirmation),
            ("web_search", Decision::Allow),
            ("codebase_search", Decision::Allow),
            // Filesystem MCP server tools
            ("read_file", Decision::Allow),
            ("read_text_file", Decision::Allow),
            ("read_media_file", Decision::Allow),
            ("read_multiple_files", Decision::Allow),
            ("write_file", Decision::RequireConfirmation),
            ("edit_file", Decision::RequireConfirmation),
            ("create_directory", Decision::RequireConfirmation),
            ("delete_file", Decision::RequireConfirmation),
            ("list_directory", Decision::Allow),
            ("list_directory_with_sizes", Decision::Allow),
            ("directory_tree", Decision::Allow),
            ("move_file", Decision::RequireConfirmation),
            ("search_files", Decision::Allow),
            ("get_file_info", Decision::Allow),
            ("list_allowed_directories", Decision::Allow),
            // Playwright MCP server tools
            ("browser_close", Decision::Allow),
            ("browser_resize", Decision::Allow),
            ("browser_console_messages", Decision::Allow),
            ("browser_handle_dialog", Decision::RequireConfirmation),
            ("browser_evaluate", Decision::RequireConfirmation),
            ("browser_file_upload", Decision::RequireConfirmation),
            ("browser_fill_form", Decision::RequireConfirmation),
            ("browser_install", Decision::Allow),
            ("browser_press_key", Decision::RequireConfirmation),
            ("browser_type", Decision::RequireConfirmation),
            ("browser_navigate", Decision::RequireConfirmation),
            ("browser_navigate_back", Decision::Allow),
            ("browser_network_requests", Decision::Allow),
            ("browser_take_screenshot", Decision::Allow),
            ("browser_snapshot", Decision::Allow),
            ("browser_click", Decision::RequireConfirmation),
            ("browser_drag", Decision::RequireConfirmation),
            ("browser_hover", Decision::Allow),
            ("browser_select_option", Decision::RequireConfirmation),
            ("browser_tabs", Decision::Allow),
            ("browser_wait_for", Decision::Allow),
        ];

        let mut rules = self.rules.lock();
        for (tool, decision) in defaults {
            rules.insert((*tool).to_string(), *decision);
        }
    }

    /// Evaluate a tool invocation. Lookup order:
    ///   1. hard denylist → Deny, full stop
    ///   2. sandbox-escape argument check → Deny, full stop
    ///   3. static rule table, unknown tools → Deny
    pub fn evaluate(&self, tool: &str, args: &serde_json::Value) -> Decision {
        if DENYLIST.contains(&tool) {
            debug!("[policy] '{}' is denylisted", tool);
            return Decision::Deny;
        }

        if is_outside_sandbox(args) {
            debug!("[policy] '{}' args escape the sandbox, denying", tool);
            return Decision::Deny;
        }

        match self.rules.lock().get(tool) {
            Some(decision) => *decision,
            None => Decision::Deny,
        }
    }

    /// Add or replace a rule. Takes effect on the next evaluation.
    pub fn add_rule(&self, tool: impl Into<String>, decision: Decision) {
        self.rules.lock().insert(tool.into(), decision);
    }

    /// Remove a rule; the tool falls back to the implicit Deny.
    pub fn remove_rule(&self, tool: &str) {
        self.rules.lock().remove(tool);
    }

    /// Snapshot of the current rule table.
    pub fn list_rules(&self) -> Vec<PolicyRule> {
        self.rules
            .lock()
            .iter()
            .map(|(tool, decision)| PolicyRule {
                tool: tool.clone(),
                decision: *decision,
            })
            .collect()
    }
}

/// True if any string-valued argument contains a parent-directory traversal
/// token or a reserved system-root prefix. Nested objects and arrays are
/// scanned too — tool schemas are opaque to the policy layer.
fn is_outside_sandbox(args: &serde_json::Value) -> bool {
    match args {
        serde_json::Value::String(s) => DANGEROUS_PATHS
            .iter()
            .any(|d| s.contains(d) || s.starts_with(d)),
        serde_json::Value::Array(items) => items.iter().any(is_outside_sandbox),
        serde_json::Value::Object(map) => map.values().any(is_outside_sandbox),
        _ => false,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_tool_is_denied() {
        let policy = PolicyEngine::new();
        assert_eq!(policy.evaluate("totally_unknown", &json!({})), Decision::Deny);
    }

    #[test]
    fn test_default_rules() {
        let policy = PolicyEngine::new();
        assert_eq!(
            policy.evaluate("read_file", &json!({"path": "/tmp/a.txt"})),
            Decision::Allow
        );
        assert_eq!(
            policy.evaluate("write_file", &json!({"path": "/tmp/a.txt"})),
            Decision::RequireConfirmation
        );
    }

    #[test]
    fn test_traversal_overrides_allow_rule() {
        let policy = PolicyEngine::new();
        assert_eq!(
            policy.evaluate("read_file", &json!({"path": "../../etc/passwd"})),
            Decision::Deny
        );
    }

    #[test]
    fn test_reserved_roots_denied() {
        let policy = PolicyEngine::new();
        for path in ["/etc/shadow", "C:\\Windows\\system32", "/System/Library"] {
            assert_eq!(
                policy.evaluate("read_file", &json!({ "path": path })),
                Decision::Deny,
                "expected deny for {}",
                path
            );
        }
    }

    #[test]
    fn test_nested_args_are_scanned() {
        let policy = PolicyEngine::new();
        let args = json!({"files": [{"path": "../secret"}]});
        assert_eq!(policy.evaluate("read_multiple_files", &args), Decision::Deny);
    }

    #[test]
    fn test_denylist_wins_over_added_rule() {
        let policy = PolicyEngine::new();
        policy.add_rule("system.exec", Decision::Allow);
        assert_eq!(policy.evaluate("system.exec", &json!({})), Decision::Deny);
    }

    #[test]
    fn test_rule_mutation_takes_effect() {
        let policy = PolicyEngine::new();
        assert_eq!(policy.evaluate("my_tool", &json!({})), Decision::Deny);

        policy.add_rule("my_tool", Decision::Allow);
        assert_eq!(policy.evaluate("my_tool", &json!({})), Decision::Allow);

        policy.remove_rule("my_tool");
        assert_eq!(policy.evaluate("my_tool", &json!({})), Decision::Deny);
    }

    #[test]
    fn test_list_rules_roundtrip() {
        let policy = PolicyEngine::empty();
        policy.add_rule("a", Decision::Allow);
        policy.add_rule("b", Decision::RequireConfirmation);
        let mut rules = policy.list_rules();
        rules.sort_by(|x, y| x.tool.cmp(&y.tool));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].tool, "a");
        assert_eq!(rules[0].decision, Decision::Allow);
    }

    #[test]
    fn test_decision_serde_screaming_case() {
        assert_eq!(
            serde_json::to_string(&Decision::RequireConfirmation).unwrap(),
            "\"REQUIRE_CONFIRMATION\""
        );
        assert_eq!(serde_json::to_string(&Decision::Deny).unwrap(), "\"DENY\"");
    }
}
