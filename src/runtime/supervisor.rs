//! SubagentSupervisor - Tracks subagents spawned by a parent session
//!
//! Every session owns one supervisor. It:
//! - Enforces the depth and active-children ceilings on `spawn`
//! - Builds the child session (own transcript, restricted tool view)
//! - Runs the child's loop on its own tokio task
//! - Resolves joins, and hands detached outcomes back to the parent as reports
//! - Cancels children with a grace period, force-terminating stragglers
//!
//! A child's outcome is delivered exactly once: to the joining spawn call if
//! it is still waiting, otherwise to the parent's mailbox.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::agent::{subagent_prompt, AgentLoop, RunOutcome};
use crate::core::{SessionStatus, ToolError};
use crate::memory::{Draft, MemoryManager, Role, SubagentReport};
use crate::session::{Session, SessionMetadata};
use crate::tools::{SpawnPolicy, SpawnRequest, SubagentSpawner, ToolContext};

use super::channels::RuntimeEvent;
use super::engine::Engine;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct ChildState {
    report: Option<SubagentReport>,
    /// Nobody is joining; the outcome goes to the parent's mailbox
    detached: bool,
}

#[derive(Debug)]
struct ChildShared {
    state: Mutex<ChildState>,
    done: watch::Sender<bool>,
}

impl ChildShared {
    fn new(detached: bool) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            state: Mutex::new(ChildState {
                report: None,
                detached,
            }),
            done,
        }
    }

    fn report(&self) -> Option<SubagentReport> {
        lock(&self.state).report.clone()
    }

    /// Record the outcome unless one is already set.
    ///
    /// Returns whether this call set it and whether the child was detached.
    fn resolve(&self, report: SubagentReport) -> (bool, bool) {
        let mut state = lock(&self.state);
        if state.report.is_some() {
            return (false, state.detached);
        }
        state.report = Some(report);
        let detached = state.detached;
        drop(state);
        self.done.send_replace(true);
        (true, detached)
    }

    async fn wait(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Routes a joined child's outcome to the parent's mailbox when the join is
/// dropped or times out before taking it
struct JoinGuard<'a> {
    handle: &'a SubagentHandle,
    taken: bool,
}

impl JoinGuard<'_> {
    /// Hand the child over to the mailbox; false if it already resolved
    fn detach(&self) -> bool {
        let mut state = lock(&self.handle.shared.state);
        if state.report.is_some() {
            return false;
        }
        state.detached = true;
        true
    }

    fn take(mut self) -> Option<SubagentReport> {
        self.taken = true;
        self.handle.shared.report()
    }
}

impl Drop for JoinGuard<'_> {
    fn drop(&mut self) {
        if self.taken {
            return;
        }
        let report = {
            let mut state = lock(&self.handle.shared.state);
            if state.detached {
                return;
            }
            state.detached = true;
            // unresolved: whoever resolves it sees `detached` and delivers
            match state.report.clone() {
                Some(report) => report,
                None => return,
            }
        };

        // resolved while nobody was reading it
        let Some(parent) = self.handle.session.parent() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { parent.deliver_report(report).await });
            }
            Err(_) => tracing::warn!(
                child_id = %self.handle.child_id,
                "[Supervisor] Dropped join outside the runtime, report not delivered"
            ),
        }
    }
}

/// A child tracked by its parent's supervisor
#[derive(Debug)]
pub struct SubagentHandle {
    pub child_id: String,
    pub parent_id: String,
    pub request: SpawnRequest,
    session: Arc<Session>,
    shared: Arc<ChildShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubagentHandle {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Current status: the child's own until an outcome is recorded
    pub fn status(&self) -> SessionStatus {
        self.shared
            .report()
            .map(|r| r.status)
            .unwrap_or_else(|| self.session.status())
    }

    pub fn report(&self) -> Option<SubagentReport> {
        self.shared.report()
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.report().is_some()
    }
}

/// Children of one session
#[derive(Default)]
pub struct SubagentSupervisor {
    children: Mutex<HashMap<String, Arc<SubagentHandle>>>,
    /// Accepted spawns whose child is still being built
    reserved: AtomicUsize,
}

/// Concurrency slot held while a child is built; released on drop
struct Reservation<'a>(&'a AtomicUsize);

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SubagentSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, child_id: &str) -> Option<Arc<SubagentHandle>> {
        lock(&self.children).get(child_id).cloned()
    }

    /// Children that have not reached a terminal state
    pub fn active_count(&self) -> usize {
        lock(&self.children)
            .values()
            .filter(|c| !c.is_resolved())
            .count()
    }

    pub fn child_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.children).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        lock(&self.children).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim a slot under the active-children ceiling before anything is built
    fn reserve(&self, parent_id: &str, limit: usize) -> Result<Reservation<'_>, ToolError> {
        let children = lock(&self.children);
        let active = children.values().filter(|c| !c.is_resolved()).count()
            + self.reserved.load(Ordering::SeqCst);
        if active >= limit {
            tracing::info!(
                session_id = %parent_id,
                active,
                limit,
                "[Supervisor] Spawn rejected: too many active subagents"
            );
            return Err(ToolError::SpawnConcurrencyExceeded { active, limit });
        }
        self.reserved.fetch_add(1, Ordering::SeqCst);
        Ok(Reservation(&self.reserved))
    }

    /// Start a child session for `request`
    pub async fn spawn(
        &self,
        parent: &Arc<Session>,
        engine: &Engine,
        request: SpawnRequest,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let config = &engine.config;
        let depth = parent.depth() + 1;
        if parent.depth() >= config.max_spawn_depth {
            tracing::info!(
                session_id = %parent.id(),
                depth,
                max_depth = config.max_spawn_depth,
                "[Supervisor] Spawn rejected: depth exceeded"
            );
            return Err(ToolError::SpawnDepthExceeded {
                depth: parent.depth(),
                max_depth: config.max_spawn_depth,
            });
        }

        let reservation = self.reserve(parent.id(), config.max_concurrent_subagents)?;
        let child = build_child(parent, engine, &request, depth).await;
        let child_id = child.id().to_string();
        let shared = Arc::new(ChildShared::new(request.policy == SpawnPolicy::FireAndForget));
        let handle = Arc::new(SubagentHandle {
            child_id: child_id.clone(),
            parent_id: parent.id().to_string(),
            request: request.clone(),
            session: child.clone(),
            shared: shared.clone(),
            task: Mutex::new(None),
        });
        {
            let mut children = lock(&self.children);
            children.insert(child_id.clone(), handle.clone());
            drop(reservation);
        }

        // the child is marked running before any report can target it
        if let Err(e) = child.begin_run().await {
            return Err(ToolError::failed(e.to_string()));
        }
        engine.save_metadata(&child.metadata());
        parent.update_metadata(|m| m.add_child(&child_id));
        engine.save_metadata(&parent.metadata());

        tracing::info!(
            session_id = %parent.id(),
            child_id = %child_id,
            depth,
            policy = ?request.policy,
            "[Supervisor] Spawning subagent"
        );
        engine.emit(RuntimeEvent::SubagentSpawned {
            parent_id: parent.id().to_string(),
            child_id: child_id.clone(),
            policy: request.policy,
        });
        engine.emit(RuntimeEvent::SessionStarted {
            session_id: child_id.clone(),
            parent_id: Some(parent.id().to_string()),
            depth,
        });

        let task = tokio::spawn(run_child(
            engine.clone(),
            child,
            shared.clone(),
            request.task.clone(),
        ));
        *lock(&handle.task) = Some(task);

        match request.policy {
            SpawnPolicy::FireAndForget => Ok(json!({
                "session_id": child_id,
                "status": "running",
            })),
            SpawnPolicy::Join => {
                let timeout = request
                    .join_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(config.subagent_join_timeout);
                self.join(&handle, timeout, config.cancel_grace_period, ctx)
                    .await
            }
        }
    }

    async fn join(
        &self,
        handle: &SubagentHandle,
        timeout: Duration,
        grace: Duration,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let guard = JoinGuard {
            handle,
            taken: false,
        };

        tokio::select! {
            biased;
            _ = handle.shared.wait() => {}
            _ = ctx.cancel.cancelled() => {
                tracing::info!(
                    child_id = %handle.child_id,
                    "[Supervisor] Parent cancelled while joining, waiting up to {:?}",
                    grace
                );
                if tokio::time::timeout(grace, handle.shared.wait()).await.is_err() {
                    force_terminate(handle).await;
                }
            }
            _ = tokio::time::sleep(timeout) => {
                if guard.detach() {
                    tracing::info!(
                        child_id = %handle.child_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "[Supervisor] Join timed out, child will report later"
                    );
                    return Err(ToolError::SubagentTimeout {
                        session_id: handle.child_id.clone(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        }

        match guard.take() {
            Some(report) => report_to_result(report),
            None => Err(ToolError::SubagentFailure {
                session_id: handle.child_id.clone(),
                message: "subagent ended without an outcome".into(),
            }),
        }
    }

    /// Cancel every unresolved child, wait up to `grace`, then force-terminate
    pub async fn shutdown(&self, grace: Duration) {
        let pending: Vec<Arc<SubagentHandle>> = lock(&self.children)
            .values()
            .filter(|c| !c.is_resolved())
            .cloned()
            .collect();
        if pending.is_empty() {
            return;
        }

        tracing::info!(
            count = pending.len(),
            "[Supervisor] Cancelling active subagents"
        );
        for child in &pending {
            child.session.cancel();
        }

        let waits = pending.iter().map(|child| async move {
            if tokio::time::timeout(grace, child.shared.wait()).await.is_err() {
                force_terminate(child).await;
            }
        });
        futures::future::join_all(waits).await;
    }
}

impl std::fmt::Debug for SubagentSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubagentSupervisor")
            .field("children", &self.len())
            .field("active", &self.active_count())
            .finish()
    }
}

fn report_to_result(report: SubagentReport) -> Result<Value, ToolError> {
    match report.status {
        SessionStatus::Completed => Ok(json!({
            "session_id": report.session_id,
            "status": "completed",
            "result": report.result.unwrap_or_default(),
        })),
        status => Err(ToolError::SubagentFailure {
            session_id: report.session_id,
            message: match report.error {
                Some(error) => format!("subagent {}: {}", status, error),
                None => format!("subagent {}", status),
            },
        }),
    }
}

/// Child session with the subagent prompt, inherited context and its task
async fn build_child(
    parent: &Arc<Session>,
    engine: &Engine,
    request: &SpawnRequest,
    depth: u32,
) -> Arc<Session> {
    let config = &engine.config;
    let child_id = uuid::Uuid::new_v4().to_string();

    let tools = match &request.tools {
        Some(allowlist) => parent.tools().restrict(allowlist),
        None => parent.tools().clone(),
    };

    let mut memory = MemoryManager::new(
        child_id.clone(),
        config.window.clone(),
        engine.transcript_store(),
    );
    memory.append(
        Draft::system(subagent_prompt(
            &request.task,
            &config.workspace,
            &tools.tool_names(),
            depth < config.max_spawn_depth,
        ))
        .pinned(),
    );

    if config.subagent_inherited_messages > 0 {
        let inherited: Vec<Draft> = {
            let parent_memory = parent.memory().lock().await;
            let text_only: Vec<Draft> = parent_memory
                .messages()
                .iter()
                .filter(|m| {
                    !m.pinned
                        && m.payload.is_none()
                        && matches!(m.role, Role::User | Role::Assistant)
                })
                .map(|m| Draft::new(m.role, m.content.clone()))
                .collect();
            let skip = text_only.len().saturating_sub(config.subagent_inherited_messages);
            text_only.into_iter().skip(skip).collect()
        };
        for draft in inherited {
            memory.append(draft);
        }
    }
    memory.append(Draft::user(request.task.clone()));

    let metadata = SessionMetadata::new_subagent(&child_id, parent.id(), depth, &request.task)
        .with_model(&config.provider.model);

    Session::new(
        metadata,
        Some(Arc::downgrade(parent)),
        memory,
        tools,
        parent.cancel_token().child_token(),
    )
}

async fn run_child(engine: Engine, child: Arc<Session>, shared: Arc<ChildShared>, task: String) {
    let outcome: RunOutcome = AgentLoop::new(
        engine.clone(),
        child.clone(),
        engine.config.subagent_max_steps,
    )
    .run()
    .await;

    let report = SubagentReport {
        session_id: child.id().to_string(),
        task,
        status: outcome.status,
        result: outcome.answer,
        error: outcome.error.map(|e| e.to_string()),
    };
    settle(&engine, &child, &shared, report).await;
}

/// Record a child's outcome and route it to the parent when nobody joins
async fn settle(engine: &Engine, child: &Session, shared: &ChildShared, report: SubagentReport) {
    let status = report.status;
    let (resolved, detached) = shared.resolve(report.clone());
    if !resolved {
        return;
    }

    let parent = child.parent();
    if let Some(parent) = &parent {
        engine.emit(RuntimeEvent::SubagentReported {
            parent_id: parent.id().to_string(),
            child_id: child.id().to_string(),
            status,
        });
        if detached {
            parent.deliver_report(report).await;
        }
    }
    tracing::info!(
        child_id = %child.id(),
        status = %status,
        detached,
        "[Supervisor] Subagent resolved"
    );
}

/// Abort a child that ignored cancellation and record it as cancelled
async fn force_terminate(handle: &SubagentHandle) {
    tracing::warn!(
        child_id = %handle.child_id,
        "[Supervisor] Subagent did not stop within the grace period, aborting"
    );
    // a missing task means another caller is already terminating this child
    let Some(task) = lock(&handle.task).take() else {
        return;
    };
    task.abort();
    let _ = task.await;
    if handle.is_resolved() {
        return;
    }

    let reason = "Force-terminated after the cancellation grace period";
    handle
        .session
        .end_run(SessionStatus::Cancelled, reason)
        .await;
    handle.session.set_status(SessionStatus::Cancelled);

    let report = SubagentReport {
        session_id: handle.child_id.clone(),
        task: handle.request.task.clone(),
        status: SessionStatus::Cancelled,
        result: None,
        error: Some(reason.to_string()),
    };
    let (resolved, detached) = handle.shared.resolve(report.clone());
    if resolved && detached {
        if let Some(parent) = handle.session.parent() {
            parent.deliver_report(report).await;
        }
    }
}

/// Spawner handed to tools of one session's run
pub struct SessionSpawner {
    session: Arc<Session>,
    engine: Engine,
}

impl SessionSpawner {
    pub fn new(session: Arc<Session>, engine: Engine) -> Self {
        Self { session, engine }
    }
}

#[async_trait]
impl SubagentSpawner for SessionSpawner {
    async fn spawn(&self, request: SpawnRequest, ctx: &ToolContext) -> Result<Value, ToolError> {
        self.session
            .supervisor()
            .spawn(&self.session, &self.engine, request, ctx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Payload, WindowConfig};
    use crate::tools::{ToolRegistry, ToolView};
    use tokio_util::sync::CancellationToken;

    fn session(id: &str, parent: Option<&Arc<Session>>) -> Arc<Session> {
        Session::new(
            SessionMetadata::new(id),
            parent.map(Arc::downgrade),
            MemoryManager::new(id, WindowConfig::default(), None),
            ToolView::all(Arc::new(ToolRegistry::new())),
            CancellationToken::new(),
        )
    }

    fn joined_child(parent: &Arc<Session>) -> SubagentHandle {
        SubagentHandle {
            child_id: "c1".into(),
            parent_id: parent.id().to_string(),
            request: SpawnRequest {
                task: "t".into(),
                tools: None,
                policy: SpawnPolicy::Join,
                join_timeout_secs: None,
            },
            session: session("c1", Some(parent)),
            shared: Arc::new(ChildShared::new(false)),
            task: Mutex::new(None),
        }
    }

    async fn reports_in(session: &Session) -> usize {
        session
            .transcript()
            .await
            .iter()
            .filter(|m| matches!(m.payload, Some(Payload::SubagentReport { .. })))
            .count()
    }

    fn report(status: SessionStatus) -> SubagentReport {
        SubagentReport {
            session_id: "c1".into(),
            task: "t".into(),
            status,
            result: Some("42".into()),
            error: Some("boom".into()),
        }
    }

    #[test]
    fn test_report_to_result() {
        let ok = report_to_result(report(SessionStatus::Completed)).unwrap();
        assert_eq!(ok["result"], "42");

        let err = report_to_result(report(SessionStatus::Cancelled)).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(err.kind(), "subagent_failure");
    }

    #[tokio::test]
    async fn test_outcome_resolves_once() {
        let shared = ChildShared::new(false);
        assert_eq!(shared.resolve(report(SessionStatus::Completed)), (true, false));
        assert_eq!(shared.resolve(report(SessionStatus::Cancelled)), (false, false));
        shared.wait().await;
        assert_eq!(shared.report().map(|r| r.status), Some(SessionStatus::Completed));
    }

    #[tokio::test]
    async fn test_abandoned_join_hands_pending_child_to_mailbox() {
        let parent = session("p", None);
        let child = joined_child(&parent);

        drop(JoinGuard {
            handle: &child,
            taken: false,
        });
        // the child resolves later and is told to deliver it itself
        assert_eq!(
            child.shared.resolve(report(SessionStatus::Completed)),
            (true, true)
        );
    }

    #[tokio::test]
    async fn test_abandoned_join_delivers_unread_outcome() {
        let parent = session("p", None);
        let child = joined_child(&parent);
        assert_eq!(
            child.shared.resolve(report(SessionStatus::Failed)),
            (true, false)
        );

        drop(JoinGuard {
            handle: &child,
            taken: false,
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while reports_in(&parent).await == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(reports_in(&parent).await, 1);
    }

    #[tokio::test]
    async fn test_taken_outcome_is_not_redelivered() {
        let parent = session("p", None);
        let child = joined_child(&parent);
        let guard = JoinGuard {
            handle: &child,
            taken: false,
        };
        child.shared.resolve(report(SessionStatus::Completed));

        assert!(guard.take().is_some());
        tokio::task::yield_now().await;
        assert_eq!(reports_in(&parent).await, 0);
    }

    #[test]
    fn test_reservations_count_against_the_ceiling() {
        let supervisor = SubagentSupervisor::new();
        let first = supervisor.reserve("p", 2).unwrap();
        let _second = supervisor.reserve("p", 2).unwrap();
        assert!(matches!(
            supervisor.reserve("p", 2),
            Err(ToolError::SpawnConcurrencyExceeded { active: 2, limit: 2 })
        ));

        drop(first);
        assert!(supervisor.reserve("p", 2).is_ok());
    }
}
