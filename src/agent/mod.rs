//! Agent execution
//!
//! - `AgentLoop` - The per-session step loop (Planning, Executing, Reflecting)
//! - `ToolExecutor` - Runs tool calls with validation, timeouts and isolation
//! - `RuntimeConfig` - Limits and provider settings for a runtime
//! - `subagent_prompt` - System prompt of child sessions

pub mod agent_loop;
pub mod config;
pub mod executor;
pub mod prompt;

pub use agent_loop::{AgentLoop, RunOutcome};
pub use config::{ConfigError, ProviderConfig, RuntimeConfig};
pub use executor::ToolExecutor;
pub use prompt::subagent_prompt;
