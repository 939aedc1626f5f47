// MCP Agent — Model Client
// The seam to the streaming language model. Providers stream internally
// and hand back the ordered chunk sequence; the orchestrator re-plays
// deltas to its event channel in arrival order.

use crate::error::{AgentError, AgentResult};
use crate::types::{Message, StreamChunk, ToolDefinition};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A streaming chat-completion backend.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// One model call: messages + offered tools → ordered stream chunks.
    /// The chunk order is the order the provider emitted them.
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: &str,
    ) -> AgentResult<Vec<StreamChunk>>;
}

// ── Mock client ────────────────────────────────────────────────────────

/// What the mock saw on one call, for assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub message_count: usize,
    pub tool_names: Vec<String>,
}

/// Scripted model for tests: each call pops the next canned outcome
/// (chunks or a provider failure) and records what it was asked.
#[derive(Default)]
pub struct MockModel {
    turns: Mutex<VecDeque<AgentResult<Vec<StreamChunk>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the chunk sequence for the next model call.
    pub fn push_turn(&self, chunks: Vec<StreamChunk>) {
        self.turns.lock().push_back(Ok(chunks));
    }

    /// Queue a provider failure for the next model call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.turns
            .lock()
            .push_back(Err(AgentError::Model(message.into())));
    }

    /// Everything the mock has been called with, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ModelClient for MockModel {
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        _model: &str,
    ) -> AgentResult<Vec<StreamChunk>> {
        self.calls.lock().push(RecordedCall {
            message_count: messages.len(),
            tool_names: tools.iter().map(|t| t.function.name.clone()).collect(),
        });
        self.turns.lock().pop_front().unwrap_or_else(|| Ok(vec![]))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_turns_in_order() {
        let mock = MockModel::new();
        mock.push_turn(vec![StreamChunk {
            delta_text: Some("first".into()),
            ..Default::default()
        }]);
        mock.push_turn(vec![StreamChunk {
            delta_text: Some("second".into()),
            ..Default::default()
        }]);

        let a = mock.chat_stream(&[], &[], "m").await.unwrap();
        let b = mock.chat_stream(&[], &[], "m").await.unwrap();
        assert_eq!(a[0].delta_text.as_deref(), Some("first"));
        assert_eq!(b[0].delta_text.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_mock_replays_failures() {
        let mock = MockModel::new();
        mock.push_failure("upstream 500");
        let err = mock.chat_stream(&[], &[], "m").await.err().unwrap();
        assert!(matches!(err, AgentError::Model(_)));
        assert!(err.to_string().contains("upstream 500"));
    }

    #[tokio::test]
    async fn test_mock_records_calls() {
        let mock = MockModel::new();
        let msgs = vec![Message::user("hi")];
        mock.chat_stream(&msgs, &[], "m").await.unwrap();
        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].message_count, 1);
        assert!(calls[0].tool_names.is_empty());
    }
}
