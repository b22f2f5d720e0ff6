//! Core types for the engine
//!
//! - `AgentError` / `ToolError` - Error types
//! - `SessionStatus` / `LoopPhase` - Session and loop state

pub mod error;
pub mod state;

pub use error::{AgentError, AgentResult, ToolError};
pub use state::{LoopPhase, SessionStatus};
