//! Transcript entries
//!
//! A [`Message`] is immutable once the [`MemoryManager`](super::MemoryManager)
//! has stamped it with a sequence number. Callers build a [`Draft`] and hand it
//! to `append`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{SessionStatus, ToolError};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    /// Sequence number of the assistant message that requested the call
    pub origin_seq: u64,
}

/// Outcome of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: Value },
    Error { error: ToolError },
}

/// Result of exactly one [`ToolCall`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: Value, duration_ms: u64) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome: ToolOutcome::Success { output },
            duration_ms,
        }
    }

    pub fn error(call: &ToolCall, error: ToolError, duration_ms: u64) -> Self {
        Self {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome: ToolOutcome::Error { error },
            duration_ms,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error { .. })
    }

    /// The typed error, if the call failed
    pub fn tool_error(&self) -> Option<&ToolError> {
        match &self.outcome {
            ToolOutcome::Error { error } => Some(error),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// Text fed back to the model for this result
    pub fn render(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { output } => match output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            ToolOutcome::Error { error } => format!("Error [{}]: {}", error.kind(), error),
        }
    }
}

/// Outcome of a child session, delivered to its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentReport {
    pub session_id: String,
    pub task: String,
    pub status: SessionStatus,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl SubagentReport {
    pub fn render(&self) -> String {
        let label: String = self.task.chars().take(60).collect();
        match self.status {
            SessionStatus::Completed => format!(
                "[Subagent {} '{}' completed successfully]\nTask: {}\nResult: {}",
                self.session_id,
                label,
                self.task,
                self.result.as_deref().unwrap_or("")
            ),
            status => format!(
                "[Subagent {} '{}' {}]\nTask: {}\nError: {}",
                self.session_id,
                label,
                status,
                self.task,
                self.error.as_deref().unwrap_or("no result")
            ),
        }
    }
}

/// Structured payload attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Assistant message that requested tool calls
    ToolCalls { calls: Vec<ToolCall> },
    /// Tool message carrying one result
    ToolResult { result: ToolResult },
    /// System message reporting a finished subagent
    SubagentReport { report: SubagentReport },
    /// Synthetic summary of older messages
    Summary {
        first_seq: u64,
        last_seq: u64,
        count: usize,
    },
    /// Terminal marker written when a run ends
    Terminal {
        status: SessionStatus,
        reason: String,
    },
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub seq: u64,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    pub timestamp: DateTime<Utc>,
    /// Pinned messages are never summarized away
    #[serde(default)]
    pub pinned: bool,
}

impl Message {
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.payload {
            Some(Payload::ToolCalls { calls }) => calls,
            _ => &[],
        }
    }

    pub fn tool_result(&self) -> Option<&ToolResult> {
        match &self.payload {
            Some(Payload::ToolResult { result }) => Some(result),
            _ => None,
        }
    }

    pub fn terminal_status(&self) -> Option<SessionStatus> {
        match &self.payload {
            Some(Payload::Terminal { status, .. }) => Some(*status),
            _ => None,
        }
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.payload, Some(Payload::Summary { .. }))
    }
}

/// A message before it is appended
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub role: Role,
    pub content: String,
    pub payload: Option<Payload>,
    pub pinned: bool,
}

impl Draft {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            payload: None,
            pinned: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.render(),
            payload: Some(Payload::ToolResult { result }),
            pinned: false,
        }
    }

    pub fn subagent_report(report: SubagentReport) -> Self {
        Self {
            role: Role::System,
            content: report.render(),
            payload: Some(Payload::SubagentReport { report }),
            pinned: false,
        }
    }

    pub fn terminal(status: SessionStatus, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            role: Role::System,
            content: format!("[Session {}] {}", status, reason),
            payload: Some(Payload::Terminal { status, reason }),
            pinned: false,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}
