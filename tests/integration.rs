// MCP Agent — integration tests
// End-to-end coverage over a real scripted tool-server process: the
// manager connects, discovers, and executes; the orchestrator drives a
// full model turn through policy, dispatch, and persistence.

#![cfg(unix)]

use mcp_agent::orchestrator::{OrchestratorConfig, ToolOrchestrator};
use mcp_agent::policy::{Decision, PolicyEngine};
use mcp_agent::provider::MockModel;
use mcp_agent::store::{PersistenceGateway, SqliteStore};
use mcp_agent::types::*;
use mcp_agent::{ConnectionStatus, ToolServerConfig, ToolServerManager};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A scripted shell tool server speaking line-framed JSON-RPC: answers
/// `initialize` (id 1), swallows the `initialized` notification, answers
/// `tools/list` (id 2) with one `echo` tool, answers `tools/call` (id 3),
/// then idles.
fn echo_server_config(id: &str) -> ToolServerConfig {
    let script = concat!(
        r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"echo-server","version":"1.0.0"}}}'; "#,
        r#"read line; "#,
        r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo back the input","inputSchema":{"type":"object","properties":{"text":{"type":"string"}}}}]}}'; "#,
        r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"echoed: hi"}]}}'; "#,
        r#"sleep 30"#,
    );
    ToolServerConfig {
        id: id.into(),
        name: format!("{} server", id),
        transport: Default::default(),
        command: "sh".into(),
        args: vec!["-c".into(), script.into()],
        env: HashMap::new(),
        url: String::new(),
        headers: HashMap::new(),
        enabled: true,
        notes: String::new(),
        raw_config: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn test_manager_connects_discovers_and_executes() {
    let manager = ToolServerManager::new(None);
    manager
        .upsert_server(echo_server_config("echo"))
        .await
        .unwrap();

    manager.connect("echo").await.unwrap();
    let state = manager.connection_state("echo");
    assert_eq!(state.status, ConnectionStatus::Connected);
    assert!(state.connected_at.is_some());

    // Discovery produced the namespaced catalog entry.
    let defs = manager.all_tool_definitions().await;
    assert_eq!(defs.len(), 1);
    assert_eq!(defs[0].function.name, "mcp_echo_echo");
    assert!(defs[0].function.description.contains("[MCP: echo]"));

    // The namespaced name resolves back to the provider pair.
    let (server_id, tool_name) = manager.resolve_tool("mcp_echo_echo").await.unwrap();
    assert_eq!(server_id, "echo");
    assert_eq!(tool_name, "echo");

    let result = manager
        .execute_tool("echo", "echo", serde_json::json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "echoed: hi");

    manager.disconnect("echo").await;
    assert_eq!(
        manager.connection_state("echo").status,
        ConnectionStatus::Disconnected
    );
    assert!(manager.all_tool_definitions().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_connects_leave_one_live_connection() {
    let manager = ToolServerManager::new(None);
    manager
        .upsert_server(echo_server_config("echo"))
        .await
        .unwrap();

    // Both connects race for the same id; the loser's connection must be
    // shut down, not leaked to its exit watcher.
    let (a, b) = tokio::join!(manager.connect("echo"), manager.connect("echo"));
    assert!(a.is_ok(), "first connect failed: {:?}", a);
    assert!(b.is_ok(), "second connect failed: {:?}", b);

    assert_eq!(
        manager.connection_state("echo").status,
        ConnectionStatus::Connected
    );
    // Exactly one registered connection serves the catalog, and it answers.
    assert_eq!(manager.all_tool_definitions().await.len(), 1);
    let result = manager
        .execute_tool("echo", "echo", serde_json::json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "echoed: hi");

    manager.disconnect("echo").await;
}

#[tokio::test]
async fn test_connect_persists_discovered_tools() {
    let store: Arc<dyn PersistenceGateway> = Arc::new(SqliteStore::in_memory().unwrap());
    let manager = ToolServerManager::new(Some(Arc::clone(&store)));
    manager
        .upsert_server(echo_server_config("echo"))
        .await
        .unwrap();
    manager.connect("echo").await.unwrap();

    let tools = store.list_tools("echo").await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    // A fresh manager over the same store sees the persisted config.
    let reloaded = ToolServerManager::new(Some(Arc::clone(&store)));
    assert_eq!(reloaded.load_servers().await.unwrap(), 1);
    assert_eq!(reloaded.list_servers()[0].id, "echo");

    manager.disconnect("echo").await;
}

#[tokio::test]
async fn test_connect_enabled_servers_reports_per_server() {
    let manager = ToolServerManager::new(None);
    manager
        .upsert_server(echo_server_config("good"))
        .await
        .unwrap();
    let mut broken = echo_server_config("broken");
    broken.command = "definitely-not-a-real-binary-xyz".into();
    manager.upsert_server(broken).await.unwrap();
    let mut off = echo_server_config("off");
    off.enabled = false;
    manager.upsert_server(off).await.unwrap();

    let results = manager.connect_enabled_servers().await;
    // Disabled servers are skipped entirely.
    assert_eq!(results.len(), 2);
    let outcome: HashMap<_, _> = results
        .into_iter()
        .map(|(id, r)| (id, r.is_ok()))
        .collect();
    assert_eq!(outcome["good"], true);
    assert_eq!(outcome["broken"], false);

    assert_eq!(
        manager.connection_state("good").status,
        ConnectionStatus::Connected
    );
    assert_eq!(
        manager.connection_state("broken").status,
        ConnectionStatus::Error
    );
    assert_eq!(
        manager.connection_state("off").status,
        ConnectionStatus::Disconnected
    );

    manager.disconnect_all().await;
}

#[tokio::test]
async fn test_full_turn_over_real_server_with_logging() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let gateway: Arc<dyn PersistenceGateway> = store.clone();

    let manager = Arc::new(ToolServerManager::new(Some(Arc::clone(&gateway))));
    manager
        .upsert_server(echo_server_config("echo"))
        .await
        .unwrap();
    manager.connect("echo").await.unwrap();

    let policy = Arc::new(PolicyEngine::new());
    policy.add_rule("echo", Decision::Allow);

    let orch = ToolOrchestrator::new(
        Arc::clone(&manager),
        policy,
        Some(Arc::clone(&gateway)),
        OrchestratorConfig {
            session_id: "sess-1".into(),
            ..Default::default()
        },
    );

    let mock = MockModel::new();
    mock.push_turn(vec![StreamChunk {
        tool_calls: vec![ToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            function_name: Some("mcp_echo_echo".into()),
            arguments_delta: Some(r#"{"text":"hi"}"#.into()),
        }],
        ..Default::default()
    }]);
    mock.push_turn(vec![StreamChunk {
        delta_text: Some("The server said hi back.".into()),
        ..Default::default()
    }]);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut messages = vec![Message::user("echo hi please")];
    let text = orch.run_turn(&mock, &mut messages, &tx).await.unwrap();
    assert_eq!(text, "The server said hi back.");

    // Transcript: user, assistant(tool_calls), tool, assistant.
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].role, Role::Tool);
    assert!(messages[2].content.contains("echoed: hi"));

    // The tool round offered the server's catalog; the follow-up offered
    // nothing.
    let calls = mock.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].tool_names.contains(&"mcp_echo_echo".to_string()));
    assert!(calls[1].tool_names.is_empty());

    // Event order: ToolRequest precedes its result; Complete closes the turn.
    let mut events = vec![];
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    let request_pos = events
        .iter()
        .position(|e| matches!(e, EngineEvent::ToolRequest { .. }))
        .unwrap();
    let result_pos = events
        .iter()
        .position(|e| matches!(e, EngineEvent::ToolResultEvent { .. }))
        .unwrap();
    assert!(request_pos < result_pos);
    match events.last().unwrap() {
        EngineEvent::Complete {
            tool_calls_count, ..
        } => assert_eq!(*tool_calls_count, 1),
        other => panic!("expected Complete, got {:?}", other),
    }

    // The decision landed in the audit log under the provider-side name.
    let logs = store.list_logs(10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].session_id, "sess-1");
    assert_eq!(logs[0].server_id.as_deref(), Some("echo"));
    assert_eq!(logs[0].tool_name, "echo");
    assert_eq!(logs[0].decision, Decision::Allow);
    assert!(logs[0].success);

    manager.disconnect_all().await;
}

#[tokio::test]
async fn test_denied_call_never_reaches_the_server() {
    // The scripted server would answer a tools/call with id 3; a denied
    // call must terminate at the policy gate instead.
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let gateway: Arc<dyn PersistenceGateway> = store.clone();

    let manager = Arc::new(ToolServerManager::new(None));
    manager
        .upsert_server(echo_server_config("echo"))
        .await
        .unwrap();
    manager.connect("echo").await.unwrap();

    let policy = Arc::new(PolicyEngine::new());
    policy.add_rule("echo", Decision::Deny);

    let orch = ToolOrchestrator::new(
        Arc::clone(&manager),
        policy,
        Some(gateway),
        OrchestratorConfig {
            session_id: "sess-2".into(),
            ..Default::default()
        },
    );

    let mock = MockModel::new();
    mock.push_turn(vec![StreamChunk {
        tool_calls: vec![ToolCallDelta {
            index: 0,
            id: Some("call_1".into()),
            function_name: Some("mcp_echo_echo".into()),
            arguments_delta: Some(r#"{"text":"hi"}"#.into()),
        }],
        ..Default::default()
    }]);
    mock.push_turn(vec![StreamChunk {
        delta_text: Some("Understood.".into()),
        ..Default::default()
    }]);

    let (tx, _rx) = mpsc::unbounded_channel();
    let mut messages = vec![Message::user("echo hi")];
    orch.run_turn(&mock, &mut messages, &tx).await.unwrap();

    // The denial is visible in the transcript and the audit log.
    assert!(messages[2].content.contains("denied by policy"));
    let logs = store.list_logs(10).await.unwrap();
    assert_eq!(logs[0].decision, Decision::Deny);
    assert!(!logs[0].success);

    // The server still answers tools/call with id 3 — proof the denied
    // call above never consumed that scripted reply.
    let result = manager
        .execute_tool("echo", "echo", serde_json::json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(result["content"][0]["text"], "echoed: hi");

    manager.disconnect_all().await;
}

#[tokio::test]
async fn test_crashed_server_is_marked_errored() {
    // Server completes the handshake and discovery, then dies.
    let script = concat!(
        r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'; "#,
        r#"read line; "#,
        r#"read line; printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}'; "#,
        r#"exit 1"#,
    );
    let mut config = echo_server_config("flaky");
    config.args = vec!["-c".into(), script.into()];

    let manager = ToolServerManager::new(None);
    manager.upsert_server(config).await.unwrap();
    manager.connect("flaky").await.unwrap();

    // Supervision notices the exit and flips the state to error.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if manager.connection_state("flaky").status == ConnectionStatus::Error {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "exit was never observed"
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(manager
        .connection_state("flaky")
        .error
        .unwrap()
        .contains("exited"));

    // The dead connection no longer serves tools.
    let err = manager
        .execute_tool("flaky", "anything", serde_json::json!({}))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("not connected"), "got {}", err);
}
