//! Engine error types
//!
//! Two layers of failure exist in the engine:
//! - [`AgentError`] ends a session (or prevents it from starting).
//! - [`ToolError`] is local to one tool call and is always written back into
//!   the transcript as a tool result, never propagated as a crash.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::ProviderError;

/// Errors that terminate a session or reject a trigger
#[derive(Error, Debug)]
pub enum AgentError {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A trigger arrived for a session that is still running a step loop
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Provider failure that could not be retried away
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The session used up its step budget
    #[error("Step budget exceeded after {steps} steps")]
    StepBudgetExceeded { steps: usize },

    /// Invalid configuration, detected before anything runs
    #[error("Invalid configuration: {0}")]
    FatalConfig(String),

    /// The session was cancelled
    #[error("Session cancelled")]
    Cancelled,

    /// The runtime is shutting down and accepts no new work
    #[error("Runtime shut down")]
    Shutdown,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Create a generic error from a string
    pub fn other(msg: impl Into<String>) -> Self {
        AgentError::Other(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AgentError::FatalConfig(msg.into())
    }
}

/// Result type alias for engine operations
pub type AgentResult<T> = Result<T, AgentError>;

/// Failure of a single tool call.
///
/// Serializable because it is stored verbatim in the tool-result payload of
/// the transcript and rendered back to the model.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("Tool timed out after {timeout_ms}ms")]
    ToolTimeout { timeout_ms: u64 },

    #[error("Tool failed: {message}")]
    Failed { message: String },

    #[error("Subagent {session_id} failed: {message}")]
    SubagentFailure { session_id: String, message: String },

    #[error("Subagent {session_id} did not finish within {timeout_ms}ms")]
    SubagentTimeout { session_id: String, timeout_ms: u64 },

    #[error("Spawn depth exceeded: session depth {depth} is at the limit of {max_depth}")]
    SpawnDepthExceeded { depth: u32, max_depth: u32 },

    #[error("Too many active subagents: {active} running, limit is {limit}")]
    SpawnConcurrencyExceeded { active: usize, limit: usize },

    #[error("Tool execution cancelled")]
    Cancelled,
}

impl ToolError {
    /// Create a generic tool failure
    pub fn failed(msg: impl Into<String>) -> Self {
        ToolError::Failed {
            message: msg.into(),
        }
    }

    /// Create an argument validation failure
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            message: msg.into(),
        }
    }

    /// Stable snake_case name of the variant, as it appears in the transcript
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::UnknownTool { .. } => "unknown_tool",
            ToolError::InvalidArguments { .. } => "invalid_arguments",
            ToolError::ToolTimeout { .. } => "tool_timeout",
            ToolError::Failed { .. } => "failed",
            ToolError::SubagentFailure { .. } => "subagent_failure",
            ToolError::SubagentTimeout { .. } => "subagent_timeout",
            ToolError::SpawnDepthExceeded { .. } => "spawn_depth_exceeded",
            ToolError::SpawnConcurrencyExceeded { .. } => "spawn_concurrency_exceeded",
            ToolError::Cancelled => "cancelled",
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::failed(err.to_string())
    }
}

impl From<anyhow::Error> for ToolError {
    fn from(err: anyhow::Error) -> Self {
        ToolError::failed(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AgentError::SessionNotFound("abc123".into());
        assert_eq!(err.to_string(), "Session not found: abc123");

        let err = AgentError::StepBudgetExceeded { steps: 3 };
        assert_eq!(err.to_string(), "Step budget exceeded after 3 steps");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AgentError = io_err.into();
        assert!(matches!(err, AgentError::Io(_)));
    }

    #[test]
    fn test_tool_error_serializes_with_kind_tag() {
        let err = ToolError::UnknownTool {
            name: "frobnicate".into(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unknown_tool");
        assert_eq!(json["name"], "frobnicate");
        assert_eq!(err.kind(), "unknown_tool");

        let back: ToolError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_tool_error_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("disk full").context("writing notes.txt");
        let tool_err: ToolError = err.into();
        assert_eq!(
            tool_err,
            ToolError::failed("writing notes.txt: disk full")
        );
    }
}
