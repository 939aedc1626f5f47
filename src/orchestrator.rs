// MCP Agent — Tool Orchestrator
// Bridges a streaming model response to tool execution: assembles
// fragmentary tool-call deltas, gates every call through the policy
// engine, dispatches allowed calls to tool servers or builtins, and
// re-enters the model exactly once with the results.

use crate::builtins::BuiltinTools;
use crate::error::{AgentError, AgentResult};
use crate::mcp::ToolServerManager;
use crate::policy::{Decision, PolicyEngine};
use crate::provider::ModelClient;
use crate::store::{PersistenceGateway, ToolLogEntry};
use crate::types::*;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Follow-up model calls after a tool round. The follow-up carries no
/// tool list, so the loop bound — not provider behavior — guarantees
/// termination.
const MAX_FOLLOW_UPS: usize = 1;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub session_id: String,
    pub model: String,
    /// Offer the builtin mock catalog alongside server-discovered tools.
    pub enable_builtins: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            session_id: String::new(),
            model: "gpt-4".into(),
            enable_builtins: true,
        }
    }
}

/// Where a resolved tool call will execute. Both variants carry the
/// provider-side name — the one the policy table keys on.
enum ToolProvider {
    Server { server_id: String, tool_name: String },
    Builtin { tool_name: &'static str },
    NotFound,
}

/// Drives one chat turn end to end. All collaborators are injected —
/// the orchestrator owns no registry of its own.
pub struct ToolOrchestrator {
    manager: Arc<ToolServerManager>,
    policy: Arc<PolicyEngine>,
    gateway: Option<Arc<dyn PersistenceGateway>>,
    config: OrchestratorConfig,
}

impl ToolOrchestrator {
    pub fn new(
        manager: Arc<ToolServerManager>,
        policy: Arc<PolicyEngine>,
        gateway: Option<Arc<dyn PersistenceGateway>>,
        config: OrchestratorConfig,
    ) -> Self {
        ToolOrchestrator {
            manager,
            policy,
            gateway,
            config,
        }
    }

    /// The combined catalog offered to the model on the first round.
    pub async fn tool_catalog(&self) -> Vec<ToolDefinition> {
        let mut defs = self.manager.all_tool_definitions().await;
        if self.config.enable_builtins {
            defs.extend(BuiltinTools::definitions());
        }
        defs
    }

    /// Run a complete agent turn: stream the model, execute its tool
    /// calls in request order, then re-invoke the model once with the
    /// results and no tool list. Returns the final text.
    pub async fn run_turn(
        &self,
        model: &dyn ModelClient,
        messages: &mut Vec<Message>,
        events: &mpsc::UnboundedSender<EngineEvent>,
    ) -> AgentResult<String> {
        let session_id = &self.config.session_id;
        let mut total_usage: Option<TokenUsage> = None;
        let mut executed_calls = 0usize;
        let mut final_text = String::new();

        for round in 0..=MAX_FOLLOW_UPS {
            let attach_tools = round == 0;
            let tools = if attach_tools {
                self.tool_catalog().await
            } else {
                vec![]
            };

            info!(
                "[engine] Model round {} session={} tools={}",
                round,
                session_id,
                tools.len()
            );

            let chunks = match model.chat_stream(messages, &tools, &self.config.model).await {
                Ok(chunks) => chunks,
                Err(e) => {
                    let _ = events.send(EngineEvent::Error {
                        session_id: session_id.clone(),
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };

            // ── Assemble the response from chunks ──────────────────────
            let mut text_accum = String::new();
            let mut fragments: HashMap<usize, (String, String, String)> = HashMap::new();

            for chunk in &chunks {
                if let Some(dt) = &chunk.delta_text {
                    text_accum.push_str(dt);
                    let _ = events.send(EngineEvent::Delta {
                        session_id: session_id.clone(),
                        text: dt.clone(),
                    });
                }

                for delta in &chunk.tool_calls {
                    let entry = fragments.entry(delta.index).or_default();
                    if let Some(id) = &delta.id {
                        entry.0 = id.clone();
                    }
                    if let Some(name) = &delta.function_name {
                        entry.1 = name.clone();
                    }
                    if let Some(args) = &delta.arguments_delta {
                        entry.2.push_str(args);
                    }
                }

                if let Some(usage) = &chunk.usage {
                    total_usage = Some(accumulate_usage(total_usage, *usage));
                }
            }

            // ── No tool calls, or the bounded follow-up: we're done ────
            if fragments.is_empty() || !attach_tools {
                if !fragments.is_empty() {
                    warn!(
                        "[engine] Model requested tools on the no-tools round, ignoring {}",
                        fragments.len()
                    );
                }
                final_text = text_accum.clone();
                messages.push(Message::assistant(text_accum));
                let _ = events.send(EngineEvent::Complete {
                    session_id: session_id.clone(),
                    text: final_text.clone(),
                    tool_calls_count: executed_calls,
                    usage: total_usage,
                });
                return Ok(final_text);
            }

            // ── Complete the calls in the model's requested order ──────
            let mut indices: Vec<usize> = fragments.keys().copied().collect();
            indices.sort_unstable();

            let tool_calls: Vec<ToolCall> = indices
                .into_iter()
                .map(|idx| {
                    let (id, name, arguments) = fragments.remove(&idx).unwrap_or_default();
                    ToolCall {
                        id: if id.is_empty() {
                            format!("call_{}", uuid::Uuid::new_v4())
                        } else {
                            id
                        },
                        call_type: "function".into(),
                        function: FunctionCall { name, arguments },
                    }
                })
                .collect();

            messages.push(Message {
                role: Role::Assistant,
                content: text_accum,
                tool_calls: Some(tool_calls.clone()),
                tool_call_id: None,
                name: None,
            });

            for tc in &tool_calls {
                let _ = events.send(EngineEvent::ToolRequest {
                    session_id: session_id.clone(),
                    tool_call: tc.clone(),
                });

                let result = self.execute_call(tc).await;
                executed_calls += 1;

                messages.push(Message {
                    role: Role::Tool,
                    content: result.output.clone(),
                    tool_calls: None,
                    tool_call_id: Some(tc.id.clone()),
                    name: Some(tc.function.name.clone()),
                });
                let _ = events.send(EngineEvent::ToolResultEvent {
                    session_id: session_id.clone(),
                    result,
                });
            }

            info!(
                "[engine] {} tool calls processed, feeding results back",
                tool_calls.len()
            );
            // Next round is the single no-tools follow-up.
        }

        Ok(final_text)
    }

    /// Gate and dispatch one tool call, wrapping every outcome — server
    /// result, builtin result, denial, missing tool — uniformly.
    async fn execute_call(&self, tc: &ToolCall) -> ToolResult {
        let name = &tc.function.name;

        // Malformed argument text degrades to an empty-argument call
        // rather than failing the whole turn.
        let args: serde_json::Value =
            serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::json!({}));

        let provider = self.resolve_provider(name).await;

        // Policy sees the provider-assigned name, not the namespaced
        // model-facing one.
        let policy_name = match &provider {
            ToolProvider::Server { tool_name, .. } => tool_name.as_str(),
            ToolProvider::Builtin { tool_name } => *tool_name,
            ToolProvider::NotFound => name.as_str(),
        };
        let decision = self.policy.evaluate(policy_name, &args);

        let result = match decision {
            Decision::Deny => ToolResult {
                tool_call_id: tc.id.clone(),
                output: format!("Tool '{}' denied by policy", policy_name),
                success: false,
                decision,
            },
            Decision::RequireConfirmation => ToolResult {
                tool_call_id: tc.id.clone(),
                output: format!(
                    "Tool '{}' not executed: confirmation required and no confirmation surface is available",
                    policy_name
                ),
                success: false,
                decision,
            },
            Decision::Allow => {
                let (success, output) = match &provider {
                    ToolProvider::Server {
                        server_id,
                        tool_name,
                    } => match self
                        .manager
                        .execute_tool(server_id, tool_name, args.clone())
                        .await
                    {
                        Ok(value) => (true, value.to_string()),
                        Err(e) => (false, e.to_string()),
                    },
                    ToolProvider::Builtin { tool_name } => {
                        match BuiltinTools::execute(tool_name, &args) {
                            Some(value) => (true, value.to_string()),
                            None => (
                                false,
                                AgentError::ToolNotFound((*tool_name).to_string()).to_string(),
                            ),
                        }
                    }
                    ToolProvider::NotFound => {
                        (false, AgentError::ToolNotFound(name.clone()).to_string())
                    }
                };
                ToolResult {
                    tool_call_id: tc.id.clone(),
                    output,
                    success,
                    decision,
                }
            }
        };

        info!(
            "[engine] Tool {} decision={:?} success={} output_len={}",
            name,
            decision,
            result.success,
            result.output.len()
        );

        self.log_decision(&provider, policy_name, &args, &result).await;
        result
    }

    async fn resolve_provider(&self, model_name: &str) -> ToolProvider {
        if let Some((server_id, tool_name)) = self.manager.resolve_tool(model_name).await {
            return ToolProvider::Server {
                server_id,
                tool_name,
            };
        }
        if self.config.enable_builtins {
            if let Some(tool_name) = BuiltinTools::resolve(model_name) {
                return ToolProvider::Builtin { tool_name };
            }
        }
        ToolProvider::NotFound
    }

    async fn log_decision(
        &self,
        provider: &ToolProvider,
        tool_name: &str,
        args: &serde_json::Value,
        result: &ToolResult,
    ) {
        let Some(gateway) = &self.gateway else { return };
        let entry = ToolLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.config.session_id.clone(),
            server_id: match provider {
                ToolProvider::Server { server_id, .. } => Some(server_id.clone()),
                _ => None,
            },
            tool_name: tool_name.to_string(),
            args: args.clone(),
            result: Some(result.output.clone()),
            decision: result.decision,
            success: result.success,
            error_message: if result.success {
                None
            } else {
                Some(result.output.clone())
            },
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = gateway.log_decision(&entry).await {
            warn!("[engine] Failed to log tool decision: {}", e);
        }
    }
}

fn accumulate_usage(total: Option<TokenUsage>, usage: TokenUsage) -> TokenUsage {
    match total {
        None => usage,
        Some(t) => TokenUsage {
            input_tokens: t.input_tokens + usage.input_tokens,
            output_tokens: t.output_tokens + usage.output_tokens,
            total_tokens: t.total_tokens + usage.total_tokens,
        },
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
