//! Core data model: messages, tool calls/results, engine and agent events.
//!
//! Grounded on the teacher's `ai/types.rs` message/request shapes, extended
//! with the tool-call plumbing and event taxonomy the agent loop requires.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A single invocation of a tool requested by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    /// Stable, unique (within a session run) identifier.
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// A message in a conversation.
///
/// Invariant (enforced by [`crate::context::ContextManager`], not by this
/// type): `role == Tool` implies `tool_call_id` is set and references a
/// `ToolCall::id` in the nearest preceding assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// True for an assistant message that requested one or more tool calls.
    pub fn has_tool_calls(&self) -> bool {
        self.role == MessageRole::Assistant && !self.tool_calls.is_empty()
    }
}

/// Cooperative cancellation flag shared between a run's owner and the tasks
/// driving it (engine stream, tool execution, worker pool).
///
/// A plain `Arc<AtomicBool>` rather than a channel: every checkpoint only
/// ever needs the current state, never a notification, and cloning is cheap
/// enough to hand a copy to each yield point.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Token usage accounting for a single engine run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A key-value snapshot of state captured around a mutating tool call.
///
/// Non-fatal by design: callers that fail to produce one simply omit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub state: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_snapshot: Option<StateSnapshot>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            metadata: None,
            state_snapshot: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        let message = error.into();
        Self {
            success: false,
            output: message.clone(),
            error: Some(message),
            metadata: None,
            state_snapshot: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_state_snapshot(mut self, snapshot: StateSnapshot) -> Self {
        self.state_snapshot = Some(snapshot);
        self
    }

    /// Text that should be appended to the conversation as the tool-role
    /// message content: the error when the call failed, the output otherwise.
    pub fn context_text(&self) -> &str {
        if self.success {
            &self.output
        } else {
            self.error.as_deref().unwrap_or("tool failed")
        }
    }
}

/// Outcome of a post-run verification pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationOutcome {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub outcome: VerificationOutcome,
    /// Confidence in [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Events emitted by an [`crate::engine::Engine`] during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Started,
    TextDelta { delta: String },
    ThinkingDelta { delta: String },
    ToolStart { id: String, tool: String, args: Value },
    ToolProgress { update: String },
    /// Only emitted by engines that execute tools internally.
    ToolEnd { id: String, result: ToolResult },
    Error { message: String, retryable: bool },
    Completed { answer: String, usage: Usage },
}

/// Events emitted by the [`crate::agent::AgentLoop`] to its consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { delta: String },
    Text { delta: String, partial: String },
    ToolStart { id: String, tool: String, args: Value },
    ToolProgress { id: String, update: String },
    ToolEnd { id: String, tool: String, result: ToolResult },
    ToolValidationError { tool: String, errors: Vec<String> },
    Verification { result: VerificationResult },
    Complete { answer: String, usage: Usage },
    Error { message: String },
    Aborted { reason: String },
}

impl AgentEvent {
    /// Terminal events end the run's event stream: exactly one of these is
    /// emitted per run, and it is always the last event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Complete { .. } | AgentEvent::Error { .. } | AgentEvent::Aborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_err_requires_error_message() {
        let r = ToolResult::err("boom");
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("boom"));
        assert_eq!(r.context_text(), "boom");
    }

    #[test]
    fn tool_result_ok_uses_output_as_context_text() {
        let r = ToolResult::ok("hello\n");
        assert!(r.success);
        assert_eq!(r.context_text(), "hello\n");
    }

    #[test]
    fn assistant_with_tool_calls_is_detected() {
        let m = Message::assistant_with_tool_calls(
            "",
            vec![ToolCall {
                id: "t1".into(),
                name: "file_read".into(),
                args: Value::Null,
            }],
        );
        assert!(m.has_tool_calls());
        assert!(!Message::assistant("plain").has_tool_calls());
    }

    #[test]
    fn terminal_events_are_classified_correctly() {
        assert!(AgentEvent::Complete { answer: "x".into(), usage: Usage::default() }.is_terminal());
        assert!(AgentEvent::Error { message: "x".into() }.is_terminal());
        assert!(AgentEvent::Aborted { reason: "x".into() }.is_terminal());
        assert!(!AgentEvent::Thinking { delta: "x".into() }.is_terminal());
    }

    #[test]
    fn cancel_token_is_shared_across_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::tool("hello", "t1");
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_call_id.as_deref(), Some("t1"));
        assert_eq!(back.role, MessageRole::Tool);
    }
}
