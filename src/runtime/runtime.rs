//! AgentRuntime - Turns triggers into session runs
//!
//! The `AgentRuntime` is responsible for:
//! - Creating root sessions, or resuming existing ones from memory or disk
//! - Running one loop per trigger, inline or on a background task
//! - Keeping the registry of root sessions
//! - Cancellation, closing and shutdown
//! - Publishing runtime events

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentLoop, RuntimeConfig};
use crate::core::{AgentError, AgentResult, SessionStatus};
use crate::llm::ModelProvider;
use crate::memory::{Draft, MemoryManager, Message};
use crate::session::{Session, SessionMetadata};
use crate::tools::{builtin_registry, ToolRegistry, ToolView};

use super::channels::{EventReceiver, RuntimeEvent};
use super::engine::Engine;
use super::handle::TriggerHandle;

/// Which session a trigger targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SessionTarget {
    #[default]
    New,
    Existing(String),
}

/// A task request from a chat message, a schedule or a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub session: SessionTarget,
    pub input: String,
    /// Stored in the session's metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Trigger {
    /// Trigger that opens a new session
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            session: SessionTarget::New,
            input: input.into(),
            metadata: HashMap::new(),
        }
    }

    /// Trigger that continues an existing session
    pub fn resume(session_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            session: SessionTarget::Existing(session_id.into()),
            input: input.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub session_id: String,
    pub status: SessionStatus,
    /// Final answer when the run completed
    pub answer: Option<String>,
    /// Why the run failed or was cancelled
    pub error: Option<String>,
    pub steps: usize,
}

/// Runtime for triggering and managing sessions
#[derive(Clone)]
pub struct AgentRuntime {
    engine: Engine,
    /// Map of session_id -> root session
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    shutdown: CancellationToken,
}

impl AgentRuntime {
    /// Create a runtime; fails on an invalid configuration
    pub fn new(
        config: RuntimeConfig,
        provider: Arc<dyn ModelProvider>,
        registry: ToolRegistry,
    ) -> AgentResult<Self> {
        Ok(Self {
            engine: Engine::new(config, provider, registry)?,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        })
    }

    /// Create a runtime with the built-in tools and `spawn`
    pub fn with_builtin_tools(
        config: RuntimeConfig,
        provider: Arc<dyn ModelProvider>,
    ) -> AgentResult<Self> {
        let registry = builtin_registry(&config)?;
        Self::new(config, provider, registry)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.engine.config
    }

    /// Create an idle root session and return its id
    pub async fn open_session(&self, metadata: HashMap<String, Value>) -> AgentResult<String> {
        self.ensure_running()?;
        let session = self.create_root(None, &metadata).await;
        Ok(session.id().to_string())
    }

    /// Run one trigger to completion
    ///
    /// # Example
    ///
    /// ```ignore
    /// let runtime = AgentRuntime::with_builtin_tools(config, provider)?;
    /// let first = runtime.handle_trigger(Trigger::new("List the files here")).await?;
    /// let next = runtime
    ///     .handle_trigger(Trigger::resume(&first.session_id, "Now count them"))
    ///     .await?;
    /// ```
    pub async fn handle_trigger(&self, trigger: Trigger) -> AgentResult<TriggerResponse> {
        let session = self.prepare(trigger).await?;
        Ok(self.run(session).await)
    }

    /// Start a trigger on a background task
    pub async fn spawn_trigger(&self, trigger: Trigger) -> AgentResult<TriggerHandle> {
        let events = self.engine.events.subscribe();
        let session = self.prepare(trigger).await?;
        let runtime = self.clone();
        let run_session = session.clone();
        let task = tokio::spawn(async move { runtime.run(run_session).await });
        Ok(TriggerHandle::new(session, task, events))
    }

    /// Resolve the target session, mark it running and append the input
    async fn prepare(&self, trigger: Trigger) -> AgentResult<Arc<Session>> {
        self.ensure_running()?;
        let session = match &trigger.session {
            SessionTarget::New => self.create_root(Some(&trigger.input), &trigger.metadata).await,
            SessionTarget::Existing(id) => self.resolve(id).await?,
        };

        session.begin_run().await?;
        if session.is_cancelled() {
            session.reset_cancel(self.shutdown.child_token());
        }
        session.update_metadata(|m| m.start_run(&trigger.input, &trigger.metadata));
        session
            .memory()
            .lock()
            .await
            .append(Draft::user(trigger.input));
        self.engine.save_metadata(&session.metadata());

        self.engine.emit(RuntimeEvent::SessionStarted {
            session_id: session.id().to_string(),
            parent_id: None,
            depth: 0,
        });
        Ok(session)
    }

    async fn run(&self, session: Arc<Session>) -> TriggerResponse {
        let outcome = AgentLoop::new(
            self.engine.clone(),
            session.clone(),
            self.engine.config.max_steps,
        )
        .run()
        .await;

        TriggerResponse {
            session_id: session.id().to_string(),
            status: outcome.status,
            answer: outcome.answer,
            error: outcome.error.map(|e| e.to_string()),
            steps: outcome.steps,
        }
    }

    async fn create_root(
        &self,
        task: Option<&str>,
        metadata: &HashMap<String, Value>,
    ) -> Arc<Session> {
        let config = &self.engine.config;
        let session_id = uuid::Uuid::new_v4().to_string();

        let mut meta = SessionMetadata::new(&session_id).with_model(&config.provider.model);
        meta.task = task.map(str::to_string);
        meta.custom = metadata.clone();

        let mut memory = MemoryManager::new(
            session_id.clone(),
            config.window.clone(),
            self.engine.transcript_store(),
        );
        memory.append(Draft::system(config.system_prompt.clone()).pinned());

        let session = Session::new(
            meta,
            None,
            memory,
            ToolView::all(self.engine.registry.clone()),
            self.shutdown.child_token(),
        );
        self.engine.save_metadata(&session.metadata());
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session.clone());

        tracing::info!(session_id = %session_id, "[Runtime] Created session");
        session
    }

    /// Find a root session in memory, or restore it from storage
    async fn resolve(&self, session_id: &str) -> AgentResult<Arc<Session>> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            return Ok(session.clone());
        }

        let storage = self
            .engine
            .storage
            .as_ref()
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        let metadata = storage.load_metadata(session_id)?;
        if metadata.is_subagent() {
            return Err(AgentError::SessionNotFound(session_id.to_string()));
        }

        let memory = MemoryManager::restore(
            session_id,
            self.engine.config.window.clone(),
            storage.clone(),
        )?;
        let session = Session::new(
            metadata,
            None,
            memory,
            ToolView::all(self.engine.registry.clone()),
            self.shutdown.child_token(),
        );

        tracing::info!(session_id = %session_id, "[Runtime] Restored session from storage");
        let mut sessions = self.sessions.write().await;
        Ok(sessions
            .entry(session_id.to_string())
            .or_insert(session)
            .clone())
    }

    fn ensure_running(&self) -> AgentResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(AgentError::Shutdown);
        }
        Ok(())
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Full transcript of a root session
    pub async fn transcript(&self, session_id: &str) -> AgentResult<Vec<Message>> {
        Ok(self.resolve(session_id).await?.transcript().await)
    }

    /// Cancel the current run of a root session and all of its descendants
    pub async fn cancel(&self, session_id: &str) -> AgentResult<()> {
        let session = self
            .session(session_id)
            .await
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;
        session.cancel();
        Ok(())
    }

    /// Stop a root session and drop it from the registry.
    ///
    /// Returns the final transcript. Persisted sessions can still be resumed
    /// later from storage.
    pub async fn close_session(&self, session_id: &str) -> AgentResult<Vec<Message>> {
        let session = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))?;

        session.cancel();
        session
            .supervisor()
            .shutdown(self.engine.config.cancel_grace_period)
            .await;
        if !session.status().is_terminal() && !session.is_running().await {
            session.set_status(SessionStatus::Completed);
        }
        self.engine.save_metadata(&session.metadata());

        tracing::info!(session_id = %session_id, "[Runtime] Closed session");
        Ok(session.transcript().await)
    }

    /// Cancel everything and refuse new triggers
    pub async fn shutdown(&self) {
        tracing::info!("[Runtime] Shutting down");
        self.shutdown.cancel();
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let grace = self.engine.config.cancel_grace_period;
        futures::future::join_all(sessions.iter().map(|s| s.supervisor().shutdown(grace))).await;
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.engine.events.subscribe()
    }

    pub fn events(&self) -> impl Stream<Item = RuntimeEvent> {
        self.engine.events.stream()
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("engine", &self.engine)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelResponse, ScriptedProvider};
    use tempfile::TempDir;

    fn runtime(provider: ScriptedProvider, dir: Option<&TempDir>) -> AgentRuntime {
        let mut config = RuntimeConfig::default();
        if let Some(dir) = dir {
            config = config.with_transcript_dir(dir.path());
        }
        AgentRuntime::new(config, Arc::new(provider), ToolRegistry::new()).unwrap()
    }

    #[tokio::test]
    async fn test_new_session_completes() {
        let provider = ScriptedProvider::new().then_respond(ModelResponse::text("hello back"));
        let runtime = runtime(provider, None);

        let response = runtime.handle_trigger(Trigger::new("hello")).await.unwrap();
        assert_eq!(response.status, SessionStatus::Completed);
        assert_eq!(response.answer.as_deref(), Some("hello back"));

        let transcript = runtime.transcript(&response.session_id).await.unwrap();
        let seqs: Vec<u64> = transcript.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(
            transcript.last().and_then(|m| m.terminal_status()),
            Some(SessionStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let runtime = runtime(ScriptedProvider::new(), None);
        let err = runtime
            .handle_trigger(Trigger::resume("missing", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
        assert!(runtime.cancel("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_resume_from_storage() {
        let dir = TempDir::new().unwrap();
        let first = runtime(
            ScriptedProvider::new().then_respond(ModelResponse::text("one")),
            Some(&dir),
        );
        let response = first.handle_trigger(Trigger::new("first")).await.unwrap();

        // a fresh runtime over the same directory picks the session up
        let second = runtime(
            ScriptedProvider::new().then_respond(ModelResponse::text("two")),
            Some(&dir),
        );
        let resumed = second
            .handle_trigger(Trigger::resume(&response.session_id, "second"))
            .await
            .unwrap();
        assert_eq!(resumed.answer.as_deref(), Some("two"));

        let transcript = second.transcript(&response.session_id).await.unwrap();
        assert_eq!(transcript.len(), 7);
        assert!(transcript.iter().zip(1u64..).all(|(m, seq)| m.seq == seq));
    }

    #[tokio::test]
    async fn test_invalid_config_is_fatal() {
        let config = RuntimeConfig::default().with_max_steps(0);
        let err = AgentRuntime::new(config, Arc::new(ScriptedProvider::new()), ToolRegistry::new())
            .unwrap_err();
        assert!(matches!(err, AgentError::FatalConfig(_)));
    }

    #[tokio::test]
    async fn test_shutdown_refuses_triggers() {
        let runtime = runtime(ScriptedProvider::new(), None);
        runtime.shutdown().await;
        assert!(matches!(
            runtime.handle_trigger(Trigger::new("hi")).await,
            Err(AgentError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_close_session_returns_transcript() {
        let provider = ScriptedProvider::new().then_respond(ModelResponse::text("done"));
        let runtime = runtime(provider, None);
        let response = runtime.handle_trigger(Trigger::new("hi")).await.unwrap();

        let transcript = runtime.close_session(&response.session_id).await.unwrap();
        assert_eq!(transcript.len(), 4);
        assert!(runtime.session(&response.session_id).await.is_none());
    }
}
