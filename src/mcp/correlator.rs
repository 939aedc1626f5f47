// MCP Agent — Request Correlation
// Matches inbound JSON-RPC responses to the caller that issued the request.
// Matching is by id, never by arrival order — multiple requests may be
// outstanding on the same connection at once.

use super::types::JsonRpcResponse;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Pending-request table for one connection. Ids are unique for the
/// lifetime of the connection.
pub struct RequestTracker {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        RequestTracker {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh monotonic request id.
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a pending entry and hand back the receiver the caller
    /// awaits on.
    pub fn register(&self, id: u64) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        rx
    }

    /// Deliver a response to exactly the entry whose id matches.
    /// Responses with no id (notifications) or an unknown id are dropped.
    pub fn resolve(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            debug!("[mcp] Notification received, ignoring");
            return;
        };
        match self.pending.lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("[mcp] Response for unknown id={}, dropping", id),
        }
    }

    /// Remove an entry whose caller gave up (timeout). The response, if it
    /// ever arrives, will be dropped as unknown.
    pub fn forget(&self, id: u64) {
        self.pending.lock().remove(&id);
    }

    /// Drop every pending entry. Each waiting caller observes a closed
    /// channel. Used when the process exits or the server is disconnected.
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!("[mcp] Failing {} in-flight requests", drained.len());
        }
        // Senders drop here; receivers see RecvError.
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
