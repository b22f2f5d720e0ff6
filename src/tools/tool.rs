//! Tool trait definition
//!
//! All tools implement this trait to provide a consistent interface:
//! describe their schemas, validate arguments and execute.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::core::ToolError;
use crate::llm::ToolSchema;

use super::isolation::Isolation;
use super::schema;
use super::spawn::SubagentSpawner;

/// Per-call context handed to a tool
#[derive(Clone)]
pub struct ToolContext {
    /// Session issuing the call
    pub session_id: String,
    /// Depth of that session in the spawn tree
    pub depth: u32,
    /// Root directory for filesystem and shell tools
    pub workspace: PathBuf,
    /// Cancelled when the session is cancelled; tools should stop and clean up
    pub cancel: CancellationToken,
    /// Present when the session may start subagents
    pub spawner: Option<Arc<dyn SubagentSpawner>>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            depth: 0,
            workspace: workspace.into(),
            cancel: CancellationToken::new(),
            spawner: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn SubagentSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("depth", &self.depth)
            .field("workspace", &self.workspace)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("can_spawn", &self.spawner.is_some())
            .finish()
    }
}

/// Trait for tools that the agent can use
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the name of this tool
    fn name(&self) -> &str;

    /// Get a description of this tool
    fn description(&self) -> &str;

    /// JSON schema of the arguments
    fn input_schema(&self) -> Value;

    /// JSON schema of a successful output. Defaults to any value.
    fn output_schema(&self) -> Value {
        json!({})
    }

    /// Resource class held while the tool runs
    fn isolation(&self) -> Isolation {
        Isolation::None
    }

    /// Tool-specific timeout for this call. `None` uses the configured default.
    fn timeout(&self, _input: &Value) -> Option<Duration> {
        None
    }

    /// Check the arguments before execution
    fn validate(&self, input: &Value) -> Result<(), ToolError> {
        schema::validate(&self.input_schema(), input).map_err(ToolError::invalid_arguments)
    }

    /// Execute the tool with validated arguments
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// Description sent to the model
    fn definition(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema(),
        }
    }
}
