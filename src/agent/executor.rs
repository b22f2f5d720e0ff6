//! Tool Executor
//!
//! Turns every tool call into exactly one [`ToolResult`]. The full flow:
//! 1. Resolve the tool in the session's view (`UnknownTool`)
//! 2. Validate arguments against the input schema (`InvalidArguments`)
//! 3. Acquire the tool's isolation scope
//! 4. Run under the per-tool timeout (`ToolTimeout`), catching panics
//! 5. Check the output against the output schema
//!
//! Nothing in here returns `Err`: failures become error results the model can
//! read.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::Value;

use crate::agent::RuntimeConfig;
use crate::core::ToolError;
use crate::memory::{ToolCall, ToolResult};
use crate::tools::{schema, IsolationScopes, Tool, ToolContext, ToolView, SPAWN_TOOL_NAME};

/// Runs tool calls for one session
pub struct ToolExecutor {
    tools: ToolView,
    scopes: Arc<IsolationScopes>,
    config: Arc<RuntimeConfig>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ToolExecutor {
    pub fn new(tools: ToolView, scopes: Arc<IsolationScopes>, config: Arc<RuntimeConfig>) -> Self {
        Self {
            tools,
            scopes,
            config,
        }
    }

    /// Configured override, then the tool's own timeout, then the default.
    ///
    /// `spawn` sizes its own timeout to outlast the join and the cancellation
    /// grace, so an override can only extend it.
    fn timeout_for(&self, tool: &dyn Tool, call: &ToolCall) -> Duration {
        let own = tool.timeout(&call.arguments);
        match (self.config.tool_timeout(&call.tool_name), own) {
            (Some(configured), Some(own)) if call.tool_name == SPAWN_TOOL_NAME => {
                configured.max(own)
            }
            (Some(configured), _) => configured,
            (None, own) => own.unwrap_or(self.config.default_tool_timeout),
        }
    }

    /// Execute one call
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let start = Instant::now();
        let outcome = self.run(call, ctx).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                tracing::debug!(
                    session_id = %ctx.session_id,
                    tool = %call.tool_name,
                    duration_ms,
                    "[Executor] Tool succeeded"
                );
                ToolResult::success(call, output, duration_ms)
            }
            Err(err) => {
                tracing::info!(
                    session_id = %ctx.session_id,
                    tool = %call.tool_name,
                    kind = err.kind(),
                    duration_ms,
                    "[Executor] Tool failed: {}",
                    err
                );
                ToolResult::error(call, err, duration_ms)
            }
        }
    }

    async fn run(&self, call: &ToolCall, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&call.tool_name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: call.tool_name.clone(),
            })?;

        tool.validate(&call.arguments)?;

        let timeout = self.timeout_for(tool.as_ref(), call);
        tracing::info!(
            session_id = %ctx.session_id,
            tool = %call.tool_name,
            timeout_ms = timeout.as_millis() as u64,
            "[Executor] Executing tool"
        );

        let guarded = async {
            let _scope = self.scopes.acquire(tool.isolation()).await?;
            AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(ToolError::failed(format!(
                        "tool panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                })
        };

        let output = tokio::time::timeout(timeout, guarded)
            .await
            .map_err(|_| ToolError::ToolTimeout {
                timeout_ms: timeout.as_millis() as u64,
            })??;

        schema::validate(&tool.output_schema(), &output)
            .map_err(|e| ToolError::failed(format!("tool output does not match its schema: {}", e)))?;
        Ok(output)
    }

    /// Execute calls concurrently, bounded by `max_parallel_tools`.
    ///
    /// Results come back in call order.
    pub async fn execute_batch(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        let limit = self.config.max_parallel_tools.max(1);
        // collected and boxed up front so the batch future stays `Send` inside spawned runs
        let runs: Vec<BoxFuture<'_, ToolResult>> =
            calls.iter().map(|call| self.execute(call, ctx).boxed()).collect();
        futures::stream::iter(runs)
            .buffered(limit)
            .collect()
            .await
    }
}
