//! The `spawn` tool: start a subagent for a bounded subtask
//!
//! The tool itself only parses the request; the session's supervisor does the
//! work through [`SubagentSpawner`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::ToolError;

use super::tool::{Tool, ToolContext};

pub const SPAWN_TOOL_NAME: &str = "spawn";

/// How the parent waits for the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpawnPolicy {
    /// Return at once; the outcome arrives later as a report
    #[default]
    FireAndForget,
    /// Block the current step until the child finishes or the timeout elapses
    Join,
}

/// Arguments of a `spawn` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnRequest {
    pub task: String,
    /// Tools the child may use, within the parent's own set
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub policy: SpawnPolicy,
    #[serde(default)]
    pub join_timeout_secs: Option<u64>,
}

/// Starts child sessions on behalf of a parent session
#[async_trait]
pub trait SubagentSpawner: Send + Sync {
    async fn spawn(&self, request: SpawnRequest, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Tool entry the model calls to start a subagent
#[derive(Debug, Clone)]
pub struct SpawnTool {
    default_join_timeout: Duration,
    cancel_grace: Duration,
    description: String,
}

const SPAWN_DESCRIPTION: &str = "Spawn a subagent to handle a task on its own. Use \
    'fire_and_forget' to keep working while it runs (its result is reported to you later) \
    or 'join' to wait for its answer.";

impl SpawnTool {
    pub fn new(default_join_timeout: Duration, cancel_grace: Duration) -> Self {
        Self {
            default_join_timeout,
            cancel_grace,
            description: spawn_description(0),
        }
    }

    /// Subagents start with the last `count` text messages of the parent
    pub fn with_inherited_messages(mut self, count: usize) -> Self {
        self.description = spawn_description(count);
        self
    }
}

fn spawn_description(inherited: usize) -> String {
    match inherited {
        0 => format!(
            "{} Subagents have their own context and cannot see this conversation, \
             so make the task self-contained.",
            SPAWN_DESCRIPTION
        ),
        n => format!(
            "{} Subagents have their own context and see only the last {} messages \
             of this conversation, so spell out anything older they need.",
            SPAWN_DESCRIPTION, n
        ),
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        SPAWN_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Self-contained description of the subtask"
                },
                "tools": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Optional allowlist of tools for the subagent"
                },
                "policy": {
                    "type": "string",
                    "enum": ["fire_and_forget", "join"],
                    "description": "Whether to wait for the result (default: fire_and_forget)"
                },
                "join_timeout_secs": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum seconds to wait when policy is 'join'"
                }
            },
            "required": ["task"],
            "additionalProperties": false
        })
    }

    fn timeout(&self, input: &Value) -> Option<Duration> {
        let join = input
            .get("join_timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(self.default_join_timeout);
        // the supervisor reports SubagentTimeout before this fires
        Some(join + self.cancel_grace + Duration::from_secs(1))
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let request: SpawnRequest = serde_json::from_value(input)
            .map_err(|e| ToolError::invalid_arguments(e.to_string()))?;
        let spawner = ctx
            .spawner
            .as_ref()
            .ok_or_else(|| ToolError::failed("this session cannot spawn subagents"))?;
        spawner.spawn(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<SpawnRequest>>,
    }

    #[async_trait]
    impl SubagentSpawner for Recorder {
        async fn spawn(&self, request: SpawnRequest, _ctx: &ToolContext) -> Result<Value, ToolError> {
            self.seen.lock().unwrap().push(request);
            Ok(json!({"session_id": "child", "status": "running"}))
        }
    }

    fn tool() -> SpawnTool {
        SpawnTool::new(Duration::from_secs(300), Duration::from_secs(5))
    }

    #[test]
    fn test_request_defaults() {
        let request: SpawnRequest = serde_json::from_value(json!({"task": "summarize"})).unwrap();
        assert_eq!(request.policy, SpawnPolicy::FireAndForget);
        assert!(request.tools.is_none());
    }

    #[test]
    fn test_timeout_covers_join_and_grace() {
        assert_eq!(
            tool().timeout(&json!({"task": "x", "join_timeout_secs": 10})),
            Some(Duration::from_secs(16))
        );
        assert_eq!(tool().timeout(&json!({"task": "x"})), Some(Duration::from_secs(306)));
    }

    #[test]
    fn test_description_follows_inheritance() {
        assert!(tool().description().contains("cannot see this conversation"));

        let inheriting = tool().with_inherited_messages(4);
        assert!(!inheriting.description().contains("cannot see"));
        assert!(inheriting.description().contains("last 4 messages"));
    }

    #[tokio::test]
    async fn test_execute_delegates_to_spawner() {
        let recorder = Arc::new(Recorder::default());
        let ctx = ToolContext::new("parent", "/tmp").with_spawner(recorder.clone());

        let out = tool()
            .execute(json!({"task": "count", "policy": "join"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["status"], "running");
        assert_eq!(recorder.seen.lock().unwrap()[0].policy, SpawnPolicy::Join);
    }

    #[tokio::test]
    async fn test_execute_without_spawner_fails() {
        let ctx = ToolContext::new("leaf", "/tmp");
        let err = tool().execute(json!({"task": "count"}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
    }
}
