// MCP Agent — Process Transport
// Spawns a tool-server child process and speaks newline-delimited JSON-RPC
// over its stdin/stdout. Stderr is drained to the log, never parsed as
// protocol. Process exit fails every in-flight request and flips the exit
// signal — this is the fault boundary between the OS process and the rest
// of the system.

use super::correlator::RequestTracker;
use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::error::{AgentError, AgentResult};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};

/// A running process transport — owns the child and the message routing.
pub struct ProcessTransport {
    /// Sender to write framed requests to the child's stdin.
    writer_tx: mpsc::Sender<Vec<u8>>,
    /// Pending requests awaiting responses, keyed by JSON-RPC id.
    tracker: Arc<RequestTracker>,
    /// Handle to the child process (for cleanup).
    child: Arc<Mutex<Option<Child>>>,
    /// Flips to `true` once the child's stdout closes or reading fails.
    exit_rx: watch::Receiver<bool>,
    /// Background reader/writer task handles.
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl ProcessTransport {
    /// Spawn a child process and set up bidirectional line-framed JSON-RPC.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> AgentResult<Self> {
        info!("[mcp] Spawning: {} {}", command, args.join(" "));

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // Merge extra env vars (credentials, allowed paths, etc.)
        for (k, v) in env {
            cmd.env(k, v);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AgentError::Process(format!("Failed to spawn `{}`: {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Process("Failed to open stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("Failed to open stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Process("Failed to open stderr".into()))?;

        let tracker = Arc::new(RequestTracker::new());
        let (exit_tx, exit_rx) = watch::channel(false);

        // ── Writer task: frames are newline-terminated JSON ────────────
        let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(64);
        let _writer_handle = {
            let mut stdin = stdin;
            tokio::spawn(async move {
                while let Some(mut msg) = writer_rx.recv().await {
                    msg.push(b'\n');
                    if let Err(e) = stdin.write_all(&msg).await {
                        error!("[mcp] stdin write error: {}", e);
                        break;
                    }
                    if let Err(e) = stdin.flush().await {
                        error!("[mcp] stdin flush error: {}", e);
                        break;
                    }
                }
                debug!("[mcp] Writer task exiting");
            })
        };

        // ── Reader task: reassembles newline-delimited messages ────────
        // `read_line` buffers partial reads internally, so a message split
        // across I/O chunks still arrives as one line.
        let _reader_handle = {
            let tracker = Arc::clone(&tracker);
            let mut reader = BufReader::new(stdout);
            tokio::spawn(async move {
                let mut line = String::new();
                loop {
                    line.clear();
                    match reader.read_line(&mut line).await {
                        Ok(0) => {
                            info!("[mcp] Stdout closed (server exited)");
                            break;
                        }
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                                Ok(resp) => tracker.resolve(resp),
                                Err(e) => {
                                    warn!("[mcp] Malformed frame, dropping: {}", e);
                                }
                            }
                        }
                        Err(e) => {
                            error!("[mcp] Read error: {}", e);
                            break;
                        }
                    }
                }
                // Terminal: no response will ever arrive for these.
                tracker.fail_all();
                let _ = exit_tx.send(true);
            })
        };

        // ── Stderr drain (diagnostics only) ────────────────────────────
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            debug!("[mcp:stderr] {}", trimmed);
                        }
                    }
                    Err(e) => {
                        warn!("[mcp] stderr read error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(ProcessTransport {
            writer_tx,
            tracker,
            child: Arc::new(Mutex::new(Some(child))),
            exit_rx,
            _reader_handle,
            _writer_handle,
        })
    }

    /// Issue a request and await its correlated response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout_secs: u64,
    ) -> AgentResult<JsonRpcResponse> {
        let id = self.tracker.next_id();
        let rx = self.tracker.register(id);

        let body = serde_json::to_vec(&JsonRpcRequest::new(id, method, params))?;
        if self.writer_tx.send(body).await.is_err() {
            self.tracker.forget(id);
            return Err(AgentError::Process("Transport writer closed".into()));
        }

        match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), rx).await {
            Ok(Ok(resp)) => Ok(resp),
            // Pending entry dropped: the process died while we waited.
            Ok(Err(_)) => Err(AgentError::Process(format!(
                "Server process exited before responding to {} (id={})",
                method, id
            ))),
            Err(_) => {
                self.tracker.forget(id);
                Err(AgentError::timeout(method, timeout_secs))
            }
        }
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> AgentResult<()> {
        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or(serde_json::json!({})),
        });
        let body = serde_json::to_vec(&notif)?;
        self.writer_tx
            .send(body)
            .await
            .map_err(|_| AgentError::Process("Transport writer closed".into()))
    }

    /// Observe process death. The receiver yields `true` exactly once,
    /// when the child's stdout closes.
    pub fn exit_signal(&self) -> watch::Receiver<bool> {
        self.exit_rx.clone()
    }

    /// Kill the child process and reject everything still in flight.
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        if let Some(ref mut child) = *guard {
            info!("[mcp] Killing child process");
            let _ = child.kill().await;
        }
        *guard = None;
        self.tracker.fail_all();
    }

    /// Check if the child process is still running.
    pub async fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().await;
        match *guard {
            Some(ref mut child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
