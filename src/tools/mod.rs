//! Tool system for the engine
//!
//! This module provides:
//! - `Tool` trait - Interface for implementing tools
//! - `ToolRegistry` / `ToolView` - Startup-time tool table and per-session views
//! - `IsolationScopes` - Resource scopes held while a tool runs
//! - `SpawnTool` - Subagent entry point
//! - `common` - Built-in tools (exec, read_file, write_file, edit_file, list_dir)

mod isolation;
mod registry;
pub mod schema;
pub mod spawn;
mod tool;

/// Common/built-in tools
pub mod common;

pub use isolation::{Isolation, IsolationGuard, IsolationLimits, IsolationScopes};
pub use registry::{ToolRegistry, ToolView};
pub use spawn::{SpawnPolicy, SpawnRequest, SpawnTool, SubagentSpawner, SPAWN_TOOL_NAME};
pub use tool::{Tool, ToolContext};

pub use common::{EditFileTool, ExecTool, ListDirTool, ReadFileTool, WriteFileTool};

use crate::agent::RuntimeConfig;
use crate::core::AgentResult;

/// Registry with the built-in tools and `spawn`
pub fn builtin_registry(config: &RuntimeConfig) -> AgentResult<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(ExecTool::new())?;
    registry.register(ReadFileTool)?;
    registry.register(WriteFileTool)?;
    registry.register(EditFileTool)?;
    registry.register(ListDirTool)?;
    registry.register(
        SpawnTool::new(config.subagent_join_timeout, config.cancel_grace_period)
            .with_inherited_messages(config.subagent_inherited_messages),
    )?;
    Ok(registry)
}
