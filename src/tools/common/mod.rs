//! Common/built-in tools
//!
//! - `ExecTool` - Execute shell commands
//! - `ReadFileTool` / `WriteFileTool` / `EditFileTool` - File access in the workspace
//! - `ListDirTool` - List directories

pub mod filesystem;
pub mod shell;

pub use filesystem::{EditFileTool, ListDirTool, ReadFileTool, WriteFileTool};
pub use shell::ExecTool;
