//! zergbot - an agent execution engine
//!
//! Turns a task request into a bounded sequence of model and tool steps,
//! optionally spawning subagents for subtasks, and keeps a gapless transcript
//! of every session.
//!
//! ```ignore
//! use std::sync::Arc;
//! use zergbot::{AgentRuntime, OpenAiProvider, ProviderConfig, RuntimeConfig, Trigger};
//!
//! let config = RuntimeConfig::default().with_provider(ProviderConfig::from_env());
//! let provider = Arc::new(OpenAiProvider::new(&config.provider)?);
//! let runtime = AgentRuntime::with_builtin_tools(config, provider)?;
//! let response = runtime.handle_trigger(Trigger::new("Summarize README.md")).await?;
//! ```

pub mod agent;
pub mod core;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod runtime;
pub mod security;
pub mod session;
pub mod tools;

pub use agent::{AgentLoop, ProviderConfig, RunOutcome, RuntimeConfig, ToolExecutor};
pub use core::{AgentError, AgentResult, LoopPhase, SessionStatus, ToolError};
pub use llm::{ModelProvider, ModelResponse, OpenAiProvider, ProviderError, ScriptedProvider};
pub use memory::{Message, Role, WindowConfig};
pub use runtime::{AgentRuntime, RuntimeEvent, SessionTarget, Trigger, TriggerHandle, TriggerResponse};
pub use session::{Session, SessionMetadata, SessionStorage};
pub use tools::{builtin_registry, Tool, ToolContext, ToolRegistry};
