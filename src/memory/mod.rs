//! Session memory: transcript, context window and write-through storage

pub mod manager;
pub mod message;
pub mod store;
pub mod window;

pub use manager::MemoryManager;
pub use message::{
    Draft, Message, Payload, Role, SubagentReport, ToolCall, ToolOutcome, ToolResult,
};
pub use store::{InMemoryStore, TranscriptStore};
pub use window::{estimate_tokens, ContextWindow, WindowConfig};
