//! Workspace file tools: read_file, write_file, edit_file, list_dir
//!
//! Every path goes through [`resolve_workspace_path`], so the tools cannot
//! leave the workspace or touch credential files.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::ToolError;
use crate::security::resolve_workspace_path;
use crate::tools::{Isolation, Tool, ToolContext};

/// Maximum file size read or written (10 MiB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Maximum entries returned by list_dir
const MAX_ITEMS: usize = 1000;

fn parse<T: for<'de> Deserialize<'de>>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::invalid_arguments(e.to_string()))
}

fn resolve(ctx: &ToolContext, path: &str) -> Result<PathBuf, ToolError> {
    resolve_workspace_path(&ctx.workspace, path).map_err(ToolError::failed)
}

fn path_schema(description: &str) -> Value {
    json!({"type": "string", "minLength": 1, "description": description})
}

#[derive(Debug, Deserialize)]
struct PathInput {
    path: String,
}

/// Read a UTF-8 text file
#[derive(Debug, Clone, Default)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"path": path_schema("The file path to read")},
            "required": ["path"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({"type": "string"})
    }

    fn isolation(&self) -> Isolation {
        Isolation::Filesystem
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: PathInput = parse(input)?;
        let path = resolve(ctx, &input.path)?;
        tracing::info!(session_id = %ctx.session_id, "[ReadFileTool] Reading {}", path.display());

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ToolError::failed(format!("File not found: {}", input.path)))?;
        if !meta.is_file() {
            return Err(ToolError::failed(format!("Not a file: {}", input.path)));
        }
        if meta.len() > MAX_FILE_SIZE {
            return Err(ToolError::failed(format!(
                "File too large ({} bytes, max {})",
                meta.len(),
                MAX_FILE_SIZE
            )));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", input.path))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| ToolError::failed("File is not valid UTF-8 text"))?;
        Ok(Value::String(text))
    }
}

#[derive(Debug, Deserialize)]
struct WriteInput {
    path: String,
    content: String,
}

/// Write a file, creating parent directories
#[derive(Debug, Clone, Default)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file at the given path. Creates parent directories if needed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_schema("The file path to write"),
                "content": {"type": "string", "description": "The content to write"}
            },
            "required": ["path", "content"]
        })
    }

    fn isolation(&self) -> Isolation {
        Isolation::Filesystem
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: WriteInput = parse(input)?;
        let path = resolve(ctx, &input.path)?;

        if input.content.len() as u64 > MAX_FILE_SIZE {
            return Err(ToolError::failed(format!(
                "Content too large (max {} bytes)",
                MAX_FILE_SIZE
            )));
        }

        tracing::info!(session_id = %ctx.session_id, "[WriteFileTool] Writing {}", path.display());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(&path, &input.content)
            .await
            .with_context(|| format!("writing {}", input.path))?;

        Ok(Value::String(format!(
            "Successfully wrote {} bytes to {}",
            input.content.len(),
            input.path
        )))
    }
}

#[derive(Debug, Deserialize)]
struct EditInput {
    path: String,
    old_text: String,
    new_text: String,
}

/// Replace one unique occurrence of a text in a file
#[derive(Debug, Clone, Default)]
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing old_text with new_text. The old_text must appear exactly once in the file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_schema("The file path to edit"),
                "old_text": {"type": "string", "minLength": 1, "description": "The exact text to find"},
                "new_text": {"type": "string", "description": "The replacement text"}
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    fn isolation(&self) -> Isolation {
        Isolation::Filesystem
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: EditInput = parse(input)?;
        let path = resolve(ctx, &input.path)?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ToolError::failed(format!("File not found: {}", input.path)))?;
        if meta.len() > MAX_FILE_SIZE {
            return Err(ToolError::failed(format!(
                "File too large (max {} bytes)",
                MAX_FILE_SIZE
            )));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", input.path))?;

        match content.matches(&input.old_text).count() {
            0 => Err(ToolError::failed("old_text not found in file")),
            1 => {
                let updated = content.replacen(&input.old_text, &input.new_text, 1);
                tokio::fs::write(&path, updated)
                    .await
                    .with_context(|| format!("writing {}", input.path))?;
                tracing::info!(session_id = %ctx.session_id, "[EditFileTool] Edited {}", path.display());
                Ok(Value::String(format!("Successfully edited {}", input.path)))
            }
            n => Err(ToolError::failed(format!(
                "old_text appears {} times. Provide more context to make it unique.",
                n
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListInput {
    path: String,
    pattern: Option<String>,
}

/// List a directory, optionally filtered by a glob pattern
#[derive(Debug, Clone, Default)]
pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory. Directories end with '/'. An optional glob pattern \
         (e.g. '*.rs') filters entry names."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": path_schema("The directory path to list"),
                "pattern": {"type": "string", "description": "Optional glob filter on entry names"}
            },
            "required": ["path"]
        })
    }

    fn output_schema(&self) -> Value {
        json!({"type": "string"})
    }

    fn isolation(&self) -> Isolation {
        Isolation::Filesystem
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let input: ListInput = parse(input)?;
        let path = resolve(ctx, &input.path)?;
        let pattern = input
            .pattern
            .as_deref()
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ToolError::invalid_arguments(format!("bad pattern: {}", e)))?;

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ToolError::failed(format!("Directory not found: {}", input.path)))?;
        if !meta.is_dir() {
            return Err(ToolError::failed(format!("Not a directory: {}", input.path)));
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .with_context(|| format!("listing {}", input.path))?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if pattern.as_ref().map_or(true, |p| p.matches(&name)) {
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                entries.push(if is_dir { format!("{}/", name) } else { name });
            }
        }
        entries.sort();

        if entries.is_empty() {
            return Ok(Value::String("Directory is empty".into()));
        }
        let total = entries.len();
        if total > MAX_ITEMS {
            entries.truncate(MAX_ITEMS);
            entries.push(format!("... ({} items, truncated)", total));
        }
        Ok(Value::String(entries.join("\n")))
    }
}
