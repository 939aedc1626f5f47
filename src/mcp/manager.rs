// MCP Agent — Tool Server Manager
// Registry of configured tool servers and the per-server connection state
// machine:
//   disconnected →(connect)→ connecting →(handshake+discovery ok)→ connected
//   connecting|connected →(error/timeout/process exit)→ error
//   connected|error|connecting →(disconnect)→ disconnected
// Exposes the combined tool catalog under namespaced model-facing names.

use super::client::ServerConnection;
use super::types::*;
use crate::error::{AgentError, AgentResult};
use crate::store::PersistenceGateway;
use crate::types::{FunctionDefinition, ToolDefinition};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

struct Inner {
    gateway: Option<Arc<dyn PersistenceGateway>>,
    servers: Mutex<HashMap<String, ToolServerConfig>>,
    states: Mutex<HashMap<String, ConnectionState>>,
    clients: AsyncMutex<HashMap<String, Arc<ServerConnection>>>,
}

/// Owns every tool-server connection. Shared via `Arc`; all mutation goes
/// through these methods.
pub struct ToolServerManager {
    inner: Arc<Inner>,
}

impl ToolServerManager {
    pub fn new(gateway: Option<Arc<dyn PersistenceGateway>>) -> Self {
        ToolServerManager {
            inner: Arc::new(Inner {
                gateway,
                servers: Mutex::new(HashMap::new()),
                states: Mutex::new(HashMap::new()),
                clients: AsyncMutex::new(HashMap::new()),
            }),
        }
    }

    // ── Registry ───────────────────────────────────────────────────────

    /// Populate the registry from the gateway.
    pub async fn load_servers(&self) -> AgentResult<usize> {
        let Some(gateway) = &self.inner.gateway else {
            return Ok(0);
        };
        let configs = gateway.list_servers().await?;
        info!("[mcp] Loaded {} servers from store", configs.len());

        let mut servers = self.inner.servers.lock();
        servers.clear();
        for config in configs {
            servers.insert(config.id.clone(), config);
        }
        Ok(servers.len())
    }

    /// Add or replace a server config. Does not touch a live connection.
    pub async fn upsert_server(&self, config: ToolServerConfig) -> AgentResult<()> {
        if let Some(gateway) = &self.inner.gateway {
            gateway.upsert_server(&config).await?;
        }
        self.inner.servers.lock().insert(config.id.clone(), config);
        Ok(())
    }

    /// Remove a server entirely: disconnect, drop its descriptors and
    /// connection state, delete it from the store.
    pub async fn remove_server(&self, id: &str) -> AgentResult<()> {
        self.disconnect(id).await;
        self.inner.servers.lock().remove(id);
        self.inner.states.lock().remove(id);
        if let Some(gateway) = &self.inner.gateway {
            gateway.delete_server(id).await?;
        }
        Ok(())
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> AgentResult<()> {
        let config = {
            let mut servers = self.inner.servers.lock();
            let config = servers
                .get_mut(id)
                .ok_or_else(|| AgentError::Config(format!("Unknown server '{}'", id)))?;
            config.enabled = enabled;
            config.clone()
        };
        if let Some(gateway) = &self.inner.gateway {
            gateway.upsert_server(&config).await?;
        }
        Ok(())
    }

    pub fn list_servers(&self) -> Vec<ToolServerConfig> {
        self.inner.servers.lock().values().cloned().collect()
    }

    // ── Connection state machine ───────────────────────────────────────

    /// Connect a server: spawn its process, handshake, discover tools.
    pub async fn connect(&self, id: &str) -> AgentResult<()> {
        // Fail fast; connection state stays untouched for bad requests.
        let config = self
            .inner
            .servers
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::Config(format!("Unknown server '{}'", id)))?;

        if !config.enabled {
            return Err(AgentError::Config(format!("Server '{}' is disabled", id)));
        }
        if config.transport == TransportKind::Remote {
            return Err(AgentError::Config(format!(
                "Server '{}' uses a remote transport, which this core does not connect",
                id
            )));
        }

        // Replace any existing connection.
        if let Some(old) = self.inner.clients.lock().await.remove(id) {
            old.shutdown().await;
        }

        self.set_state(
            id,
            ConnectionState {
                status: ConnectionStatus::Connecting,
                connected_at: None,
                error: None,
            },
        );

        let launch = resolve_launch_config(config);
        match ServerConnection::connect(launch).await {
            Ok(conn) => {
                let conn = Arc::new(conn);
                let now = chrono::Utc::now().to_rfc3339();

                if let Some(gateway) = &self.inner.gateway {
                    if let Err(e) = gateway.replace_tools(id, &conn.tools).await {
                        warn!("[mcp] Failed to persist tools for '{}': {}", id, e);
                    }
                    if let Err(e) = gateway
                        .update_server_status(id, "connected", Some(&now), None)
                        .await
                    {
                        warn!("[mcp] Failed to persist status for '{}': {}", id, e);
                    }
                }

                self.set_state(
                    id,
                    ConnectionState {
                        status: ConnectionStatus::Connected,
                        connected_at: Some(now),
                        error: None,
                    },
                );

                // Register before watching, so an immediate exit still finds
                // the client it must evict. A racing connect on the same id
                // may have registered between the removal above and here;
                // shut the displaced connection down instead of leaking its
                // process to a watcher that would never evict it.
                let displaced = self
                    .inner
                    .clients
                    .lock()
                    .await
                    .insert(id.to_string(), Arc::clone(&conn));
                if let Some(old) = displaced {
                    old.shutdown().await;
                }
                self.spawn_exit_watcher(id, &conn);
                info!("[mcp] Server '{}' connected", id);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                warn!("[mcp] Connect failed for '{}': {}", id, message);
                self.set_state(
                    id,
                    ConnectionState {
                        status: ConnectionStatus::Error,
                        connected_at: None,
                        error: Some(message.clone()),
                    },
                );
                if let Some(gateway) = &self.inner.gateway {
                    let _ = gateway
                        .update_server_status(id, "error", None, Some(&message))
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Watch for the server process dying while idle: transition to error
    /// and drop the dead client, without touching other servers.
    fn spawn_exit_watcher(&self, id: &str, conn: &Arc<ServerConnection>) {
        let inner = Arc::clone(&self.inner);
        let watched = Arc::clone(conn);
        let id = id.to_string();
        let mut exit = conn.exit_signal();

        tokio::spawn(async move {
            while !*exit.borrow_and_update() {
                if exit.changed().await.is_err() {
                    return;
                }
            }

            let mut clients = inner.clients.lock().await;
            // Only act if this exact connection is still registered — a
            // deliberate disconnect or reconnect already replaced it.
            let still_current = clients
                .get(&id)
                .map(|c| Arc::ptr_eq(c, &watched))
                .unwrap_or(false);
            if !still_current {
                return;
            }
            clients.remove(&id);
            drop(clients);

            let message = "Server process exited unexpectedly".to_string();
            warn!("[mcp] {} ({})", message, id);
            inner.states.lock().insert(
                id.clone(),
                ConnectionState {
                    status: ConnectionStatus::Error,
                    connected_at: None,
                    error: Some(message.clone()),
                },
            );
            if let Some(gateway) = &inner.gateway {
                let _ = gateway
                    .update_server_status(&id, "error", None, Some(&message))
                    .await;
            }
        });
    }

    /// Kill the process (if any) and transition to disconnected,
    /// unconditionally. Requests still in flight are rejected.
    pub async fn disconnect(&self, id: &str) {
        if let Some(conn) = self.inner.clients.lock().await.remove(id) {
            conn.shutdown().await;
        }
        self.set_state(id, ConnectionState::disconnected());
        if let Some(gateway) = &self.inner.gateway {
            let _ = gateway
                .update_server_status(id, "disconnected", None, None)
                .await;
        }
        info!("[mcp] Server '{}' disconnected", id);
    }

    pub async fn disconnect_all(&self) {
        let ids: Vec<String> = self.inner.clients.lock().await.keys().cloned().collect();
        for id in ids {
            self.disconnect(&id).await;
        }
    }

    /// Connect every enabled server, best-effort. One server's failure
    /// never aborts the others; each outcome is returned per-server.
    pub async fn connect_enabled_servers(&self) -> Vec<(String, AgentResult<()>)> {
        let enabled: Vec<String> = self
            .inner
            .servers
            .lock()
            .values()
            .filter(|s| s.enabled)
            .map(|s| s.id.clone())
            .collect();

        info!("[mcp] Connecting {} enabled servers", enabled.len());
        let mut results = Vec::with_capacity(enabled.len());
        for id in enabled {
            let result = self.connect(&id).await;
            if let Err(e) = &result {
                warn!("[mcp] '{}' failed to connect: {}", id, e);
            }
            results.push((id, result));
        }
        results
    }

    /// Tear down every connection and reconnect the enabled servers.
    pub async fn restart_connections(&self) -> Vec<(String, AgentResult<()>)> {
        info!("[mcp] Restarting connections");
        self.disconnect_all().await;
        self.inner.states.lock().clear();
        self.connect_enabled_servers().await
    }

    fn set_state(&self, id: &str, state: ConnectionState) {
        self.inner.states.lock().insert(id.to_string(), state);
    }

    /// Current connection state; servers never connected report
    /// disconnected.
    pub fn connection_state(&self, id: &str) -> ConnectionState {
        self.inner
            .states
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(ConnectionState::disconnected)
    }

    /// Display rows for every configured server.
    pub async fn status_list(&self) -> Vec<ServerStatus> {
        let servers: Vec<(String, String)> = self
            .inner
            .servers
            .lock()
            .values()
            .map(|s| (s.id.clone(), s.name.clone()))
            .collect();
        let clients = self.inner.clients.lock().await;

        servers
            .into_iter()
            .map(|(id, name)| {
                let state = self.connection_state(&id);
                ServerStatus {
                    tool_count: clients.get(&id).map(|c| c.tools.len()).unwrap_or(0),
                    id,
                    name,
                    status: state.status,
                    error: state.error,
                }
            })
            .collect()
    }

    // ── Tool catalog & execution ───────────────────────────────────────

    /// All discovered tools as model-facing definitions, namespaced
    /// `mcp_{server_id}_{sanitized_name}` so names never collide across
    /// servers or with builtins.
    pub async fn all_tool_definitions(&self) -> Vec<ToolDefinition> {
        let clients = self.inner.clients.lock().await;
        let mut defs = Vec::new();
        for (server_id, conn) in clients.iter() {
            for tool in &conn.tools {
                defs.push(descriptor_to_definition(server_id, tool));
            }
        }
        defs
    }

    /// Map a model-facing `mcp_{server_id}_{name}` back to
    /// `(server_id, provider_name)`. Server ids may themselves contain
    /// underscores, so match known ids longest-first.
    pub async fn resolve_tool(&self, model_name: &str) -> Option<(String, String)> {
        let stripped = model_name.strip_prefix("mcp_")?;
        let clients = self.inner.clients.lock().await;

        let mut ids: Vec<&String> = clients.keys().collect();
        ids.sort_by_key(|id| std::cmp::Reverse(id.len()));

        for id in ids {
            let Some(rest) = stripped
                .strip_prefix(id.as_str())
                .and_then(|r| r.strip_prefix('_'))
            else {
                continue;
            };
            let conn = &clients[id.as_str()];
            if let Some(tool) = conn.tools.iter().find(|t| sanitize_tool_name(&t.name) == rest) {
                return Some((id.clone(), tool.name.clone()));
            }
        }
        None
    }

    /// Execute a tool on a connected server. The caller has already
    /// passed the policy gate.
    pub async fn execute_tool(
        &self,
        server_id: &str,
        tool_name: &str,
        args: serde_json::Value,
    ) -> AgentResult<serde_json::Value> {
        if self.connection_state(server_id).status != ConnectionStatus::Connected {
            return Err(AgentError::Config(format!(
                "Server '{}' is not connected",
                server_id
            )));
        }
        let conn = self
            .inner
            .clients
            .lock()
            .await
            .get(server_id)
            .cloned()
            .ok_or_else(|| AgentError::Config(format!("Server '{}' is not connected", server_id)))?;

        conn.call_tool(tool_name, args).await
    }
}

// ── Launch config normalization ────────────────────────────────────────

/// Resolve symbolic path placeholders in the argument list to concrete
/// paths before spawning.
fn resolve_launch_config(mut config: ToolServerConfig) -> ToolServerConfig {
    let home = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
    config.args = config
        .args
        .into_iter()
        .map(|arg| {
            if arg == "~/Desktop" {
                home.join("Desktop").to_string_lossy().into_owned()
            } else if arg.starts_with("/path/to/") {
                home.join("Documents").to_string_lossy().into_owned()
            } else {
                arg
            }
        })
        .collect();
    config
}

// ── Naming helpers ─────────────────────────────────────────────────────

/// Restrict a provider-assigned tool name to the character set model APIs
/// accept for function names.
pub fn sanitize_tool_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Model-facing name for a server tool.
pub fn model_tool_name(server_id: &str, tool_name: &str) -> String {
    format!("mcp_{}_{}", server_id, sanitize_tool_name(tool_name))
}

fn descriptor_to_definition(server_id: &str, tool: &ToolDescriptor) -> ToolDefinition {
    let description = format!(
        "{} [MCP: {}]",
        tool.description.as_deref().unwrap_or("(no description)"),
        server_id
    );
    ToolDefinition {
        tool_type: "function".into(),
        function: FunctionDefinition {
            name: model_tool_name(server_id, &tool.name),
            description,
            parameters: tool.input_schema.clone(),
        },
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
