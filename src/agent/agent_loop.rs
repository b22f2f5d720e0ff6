//! Agent Loop Controller
//!
//! Drives one run of a session through its phases:
//!
//! ```text
//! Planning -> Executing -> Reflecting -> Planning ...
//!     |            |            |
//!     v            v            v
//!  Failed/      Done        Cancelled/Failed (step budget)
//!  Cancelled
//! ```
//!
//! A run ends in exactly one terminal phase and always writes a terminal
//! marker to the transcript. The caller has already called
//! [`Session::begin_run`] and appended the input for this run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::{AgentError, LoopPhase, SessionStatus};
use crate::llm::{complete_with_retry, ChatMessage, ModelRequest, ModelResponse, ProviderError};
use crate::memory::{Draft, Payload, ToolCall, ToolResult};
use crate::runtime::{Engine, RuntimeEvent, SessionSpawner, WorkerSlot};
use crate::session::Session;
use crate::tools::{SubagentSpawner, ToolContext};

use super::executor::ToolExecutor;

/// How a run ended
#[derive(Debug)]
pub struct RunOutcome {
    pub status: SessionStatus,
    /// Final answer of a completed run
    pub answer: Option<String>,
    /// Error that failed the run
    pub error: Option<AgentError>,
    /// Completed steps
    pub steps: usize,
}

#[derive(Default)]
struct RunState {
    steps: usize,
    calls: Vec<ToolCall>,
    results: Vec<ToolResult>,
    answer: Option<String>,
    error: Option<AgentError>,
    slot: Option<WorkerSlot>,
}

/// Step loop for one run of one session
pub struct AgentLoop {
    engine: Engine,
    session: Arc<Session>,
    max_steps: usize,
}

impl AgentLoop {
    pub fn new(engine: Engine, session: Arc<Session>, max_steps: usize) -> Self {
        Self {
            engine,
            session,
            max_steps,
        }
    }

    /// Run until a terminal phase
    pub async fn run(self) -> RunOutcome {
        let span = tracing::info_span!(
            "agent_loop",
            session_id = %self.session.id(),
            depth = self.session.depth()
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(self) -> RunOutcome {
        let cancel = self.session.cancel_token();
        let executor = ToolExecutor::new(
            self.session.tools().clone(),
            self.engine.scopes.clone(),
            self.engine.config.clone(),
        );
        let spawner: Arc<dyn SubagentSpawner> = Arc::new(SessionSpawner::new(
            self.session.clone(),
            self.engine.clone(),
        ));
        let ctx = ToolContext::new(self.session.id(), self.engine.config.workspace.clone())
            .with_depth(self.session.depth())
            .with_cancel(cancel.clone())
            .with_spawner(spawner);

        tracing::info!(max_steps = self.max_steps, "[AgentLoop] Run started");

        let mut state = RunState::default();
        let mut phase = match self.engine.pool.acquire().await {
            Ok(slot) => {
                state.slot = Some(slot);
                LoopPhase::Planning
            }
            Err(e) => {
                state.error = Some(e);
                LoopPhase::Failed
            }
        };

        while !phase.is_terminal() {
            tracing::trace!(
                phase = %phase,
                steps = state.steps,
                holding_slot = state.slot.is_some(),
                "[AgentLoop] Phase"
            );
            phase = match phase {
                LoopPhase::Planning => self.plan(&mut state, &cancel).await,
                LoopPhase::Executing => self.execute(&mut state, &executor, &ctx).await,
                LoopPhase::Reflecting => self.reflect(&mut state, &cancel).await,
                LoopPhase::Done | LoopPhase::Failed | LoopPhase::Cancelled => phase,
            };
        }

        self.finish(phase, state).await
    }

    /// Ask the model for the next action
    async fn plan(&self, state: &mut RunState, cancel: &CancellationToken) -> LoopPhase {
        if cancel.is_cancelled() {
            return LoopPhase::Cancelled;
        }

        let drained = self.session.drain_reports().await;
        if drained > 0 {
            tracing::debug!(drained, "[AgentLoop] Appended subagent reports");
        }

        let config = &self.engine.config;
        let request = {
            let memory = self.session.memory().lock().await;
            let window = memory.windowed_read();
            if window.summarized() > 0 {
                tracing::debug!(
                    summarized = window.summarized(),
                    tokens = window.estimated_tokens(),
                    "[AgentLoop] Context window compacted"
                );
            }
            ModelRequest {
                model: config.provider.model.clone(),
                messages: window.messages().iter().map(ChatMessage::from).collect(),
                tools: self.session.tools().definitions(),
                sampling: config.sampling.clone(),
            }
        };

        state.slot = None;
        let response = complete_with_retry(
            self.engine.provider.as_ref(),
            &request,
            &config.retry,
            config.provider_timeout,
            cancel,
        )
        .await;
        if let Some(phase) = self.reacquire(state).await {
            return phase;
        }

        let response = response.map(|r| match r {
            ModelResponse::ToolCalls { text, calls } if calls.is_empty() => ModelResponse::Final {
                text: text.unwrap_or_default(),
            },
            r => r,
        });

        match response {
            Ok(ModelResponse::Final { text }) => {
                tracing::info!("[AgentLoop] Final answer received");
                self.session
                    .memory()
                    .lock()
                    .await
                    .append(Draft::assistant(text.clone()));
                state.calls.clear();
                state.answer = Some(text);
                LoopPhase::Executing
            }
            Ok(ModelResponse::ToolCalls { text, calls }) => {
                let message = self.session.memory().lock().await.append_with(|seq| {
                    let calls = calls
                        .into_iter()
                        .map(|call| ToolCall {
                            call_id: if call.id.is_empty() {
                                format!("call_{}", uuid::Uuid::new_v4().simple())
                            } else {
                                call.id
                            },
                            tool_name: call.name,
                            arguments: call.arguments,
                            origin_seq: seq,
                        })
                        .collect();
                    Draft::assistant(text.unwrap_or_default())
                        .with_payload(Payload::ToolCalls { calls })
                });
                state.calls = message.tool_calls().to_vec();
                tracing::info!(calls = state.calls.len(), "[AgentLoop] Tool calls requested");
                LoopPhase::Executing
            }
            Err(ProviderError::Cancelled) => LoopPhase::Cancelled,
            Err(e) => {
                tracing::error!(
                    category = e.category(),
                    "[AgentLoop] Provider failed: {}",
                    crate::security::mask_sensitive(&e.to_string())
                );
                state.error = Some(AgentError::Provider(e));
                LoopPhase::Failed
            }
        }
    }

    /// Dispatch the requested tool calls, or finish on a final answer
    async fn execute(
        &self,
        state: &mut RunState,
        executor: &ToolExecutor,
        ctx: &ToolContext,
    ) -> LoopPhase {
        if state.calls.is_empty() {
            state.steps += 1;
            return LoopPhase::Done;
        }

        for call in &state.calls {
            self.engine.emit(RuntimeEvent::ToolStarted {
                session_id: self.session.id().to_string(),
                call_id: call.call_id.clone(),
                tool: call.tool_name.clone(),
            });
        }

        state.slot = None;
        let results = executor.execute_batch(&state.calls, ctx).await;
        if let Some(phase) = self.reacquire(state).await {
            return phase;
        }

        state.results = results;
        LoopPhase::Reflecting
    }

    /// Record tool results and decide whether to plan again
    async fn reflect(&self, state: &mut RunState, cancel: &CancellationToken) -> LoopPhase {
        {
            let mut memory = self.session.memory().lock().await;
            for result in state.results.drain(..) {
                self.engine.emit(RuntimeEvent::ToolFinished {
                    session_id: self.session.id().to_string(),
                    call_id: result.call_id.clone(),
                    tool: result.tool_name.clone(),
                    is_error: result.is_error(),
                    duration_ms: result.duration_ms,
                });
                memory.append(Draft::tool_result(result));
            }
        }
        state.calls.clear();
        state.steps += 1;

        if cancel.is_cancelled() {
            return LoopPhase::Cancelled;
        }
        if state.steps >= self.max_steps {
            tracing::warn!(steps = state.steps, "[AgentLoop] Step budget exhausted");
            state.error = Some(AgentError::StepBudgetExceeded { steps: state.steps });
            return LoopPhase::Failed;
        }
        LoopPhase::Planning
    }

    async fn reacquire(&self, state: &mut RunState) -> Option<LoopPhase> {
        match self.engine.pool.acquire().await {
            Ok(slot) => {
                state.slot = Some(slot);
                None
            }
            Err(e) => {
                state.error = Some(e);
                Some(LoopPhase::Failed)
            }
        }
    }

    /// Shut down children where needed and write the terminal marker
    async fn finish(&self, phase: LoopPhase, mut state: RunState) -> RunOutcome {
        state.slot = None;
        let status = phase.session_status().unwrap_or(SessionStatus::Failed);

        if status == SessionStatus::Cancelled || self.session.is_subagent() {
            self.session
                .supervisor()
                .shutdown(self.engine.config.cancel_grace_period)
                .await;
        }

        let reason = match status {
            SessionStatus::Completed => format!("Completed after {} steps", state.steps),
            SessionStatus::Cancelled => "Session cancelled".to_string(),
            _ => state
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Session failed".to_string()),
        };
        self.session.end_run(status, &reason).await;
        self.session.set_status(status);
        self.engine.save_metadata(&self.session.metadata());
        self.engine.emit(RuntimeEvent::SessionFinished {
            session_id: self.session.id().to_string(),
            status,
        });

        tracing::info!(
            status = %status,
            steps = state.steps,
            "[AgentLoop] Run finished: {}",
            reason
        );

        RunOutcome {
            status,
            answer: if status == SessionStatus::Completed {
                state.answer
            } else {
                None
            },
            error: if status == SessionStatus::Cancelled {
                Some(AgentError::Cancelled)
            } else {
                state.error
            },
            steps: state.steps,
        }
    }
}
