// MCP Agent — Persistence Gateway
// Pure data operations for server configs, discovered tool descriptors,
// and tool decision/execution logs. No business rules live here — the
// manager and orchestrator decide, the gateway records.

use crate::error::{AgentError, AgentResult};
use crate::mcp::types::{ToolDescriptor, ToolServerConfig};
use crate::policy::Decision;
use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One row of the tool decision/execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLogEntry {
    pub id: String,
    pub session_id: String,
    pub server_id: Option<String>,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub result: Option<String>,
    pub decision: Decision,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: String,
}

/// CRUD surface consumed by the manager and orchestrator.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn list_servers(&self) -> AgentResult<Vec<ToolServerConfig>>;
    async fn get_server(&self, id: &str) -> AgentResult<Option<ToolServerConfig>>;
    async fn upsert_server(&self, config: &ToolServerConfig) -> AgentResult<()>;
    /// Record the last known connection status for display.
    async fn update_server_status(
        &self,
        id: &str,
        status: &str,
        last_connected: Option<&str>,
        error_message: Option<&str>,
    ) -> AgentResult<()>;
    /// Delete a server and everything it owns (descriptors included).
    async fn delete_server(&self, id: &str) -> AgentResult<()>;

    /// Replace all descriptors previously known for a server.
    async fn replace_tools(&self, server_id: &str, tools: &[ToolDescriptor]) -> AgentResult<()>;
    async fn list_tools(&self, server_id: &str) -> AgentResult<Vec<ToolDescriptor>>;

    async fn log_decision(&self, entry: &ToolLogEntry) -> AgentResult<()>;
    async fn list_logs(&self, limit: usize) -> AgentResult<Vec<ToolLogEntry>>;
}

// ── SQLite implementation ──────────────────────────────────────────────

/// Thread-safe SQLite store. The connection sits behind a mutex; every
/// operation is short-lived, so blocking the async executor briefly is
/// acceptable (same trade the session store makes).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and run migrations.
    pub fn open(path: impl AsRef<Path>) -> AgentResult<Self> {
        info!("[store] Opening store at {:?}", path.as_ref());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        let store = SqliteStore {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> AgentResult<Self> {
        let store = SqliteStore {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> AgentResult<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS mcp_servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                config_json TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                status TEXT NOT NULL DEFAULT 'disconnected',
                last_connected TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS mcp_tools (
                id TEXT PRIMARY KEY,
                mcp_server_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                input_schema TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS mcp_tool_logs (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                mcp_server_id TEXT,
                tool_name TEXT NOT NULL,
                args TEXT NOT NULL DEFAULT '{}',
                result TEXT,
                decision TEXT NOT NULL,
                success INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            ",
        )?;
        Ok(())
    }
}

fn decision_to_str(d: Decision) -> &'static str {
    match d {
        Decision::Allow => "ALLOW",
        Decision::Deny => "DENY",
        Decision::RequireConfirmation => "REQUIRE_CONFIRMATION",
    }
}

fn decision_from_str(s: &str) -> Decision {
    match s {
        "ALLOW" => Decision::Allow,
        "REQUIRE_CONFIRMATION" => Decision::RequireConfirmation,
        _ => Decision::Deny,
    }
}

#[async_trait]
impl PersistenceGateway for SqliteStore {
    async fn list_servers(&self) -> AgentResult<Vec<ToolServerConfig>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT config_json FROM mcp_servers ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut servers = Vec::new();
        for row in rows {
            let json = row?;
            servers.push(serde_json::from_str(&json)?);
        }
        Ok(servers)
    }

    async fn get_server(&self, id: &str) -> AgentResult<Option<ToolServerConfig>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT config_json FROM mcp_servers WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(serde_json::from_str(&row?)?)),
            None => Ok(None),
        }
    }

    async fn upsert_server(&self, config: &ToolServerConfig) -> AgentResult<()> {
        let json = serde_json::to_string(config)?;
        self.conn.lock().execute(
            "INSERT INTO mcp_servers (id, name, config_json, enabled)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 config_json = excluded.config_json,
                 enabled = excluded.enabled,
                 updated_at = datetime('now')",
            params![config.id, config.name, json, config.enabled as i64],
        )?;
        Ok(())
    }

    async fn update_server_status(
        &self,
        id: &str,
        status: &str,
        last_connected: Option<&str>,
        error_message: Option<&str>,
    ) -> AgentResult<()> {
        self.conn.lock().execute(
            "UPDATE mcp_servers
             SET status = ?2,
                 last_connected = COALESCE(?3, last_connected),
                 error_message = ?4,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![id, status, last_connected, error_message],
        )?;
        Ok(())
    }

    async fn delete_server(&self, id: &str) -> AgentResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM mcp_tools WHERE mcp_server_id = ?1", params![id])?;
        conn.execute("DELETE FROM mcp_servers WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn replace_tools(&self, server_id: &str, tools: &[ToolDescriptor]) -> AgentResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM mcp_tools WHERE mcp_server_id = ?1",
            params![server_id],
        )?;
        let mut stmt = conn.prepare(
            "INSERT INTO mcp_tools (id, mcp_server_id, name, description, input_schema)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for tool in tools {
            stmt.execute(params![
                uuid::Uuid::new_v4().to_string(),
                server_id,
                tool.name,
                tool.description,
                serde_json::to_string(&tool.input_schema)?,
            ])?;
        }
        Ok(())
    }

    async fn list_tools(&self, server_id: &str) -> AgentResult<Vec<ToolDescriptor>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name, description, input_schema FROM mcp_tools
             WHERE mcp_server_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![server_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut tools = Vec::new();
        for row in rows {
            let (name, description, schema) = row?;
            tools.push(ToolDescriptor {
                server_id: server_id.to_string(),
                name,
                description,
                input_schema: serde_json::from_str(&schema)
                    .unwrap_or(serde_json::json!({"type": "object", "properties": {}})),
            });
        }
        Ok(tools)
    }

    async fn log_decision(&self, entry: &ToolLogEntry) -> AgentResult<()> {
        self.conn.lock().execute(
            "INSERT INTO mcp_tool_logs
             (id, session_id, mcp_server_id, tool_name, args, result, decision, success, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.id,
                entry.session_id,
                entry.server_id,
                entry.tool_name,
                serde_json::to_string(&entry.args)?,
                entry.result,
                decision_to_str(entry.decision),
                entry.success as i64,
                entry.error_message,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    async fn list_logs(&self, limit: usize) -> AgentResult<Vec<ToolLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, mcp_server_id, tool_name, args, result, decision, success, error_message, created_at
             FROM mcp_tool_logs ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ToolLogEntry {
                id: row.get(0)?,
                session_id: row.get(1)?,
                server_id: row.get(2)?,
                tool_name: row.get(3)?,
                args: serde_json::from_str(&row.get::<_, String>(4)?)
                    .unwrap_or(serde_json::Value::Null),
                result: row.get(5)?,
                decision: decision_from_str(&row.get::<_, String>(6)?),
                success: row.get::<_, i64>(7)? != 0,
                error_message: row.get(8)?,
                created_at: row.get(9)?,
            })
        })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(AgentError::from)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
