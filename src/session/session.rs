//! Session state
//!
//! A `Session` owns one transcript (through its [`MemoryManager`]), the tool
//! view it runs with, its cancellation token and the supervisor of its
//! children. Children hold only a weak back-reference to their parent, so the
//! spawn tree is owned strictly top-down.
//!
//! Subagent reports go through a mailbox: while a run is in progress they are
//! queued and drained at the start of the next Planning phase, so a report
//! never lands between an assistant tool-call message and its results.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentResult, SessionStatus};
use crate::memory::{Draft, MemoryManager, Message, SubagentReport};
use crate::runtime::SubagentSupervisor;
use crate::tools::ToolView;

use super::metadata::SessionMetadata;

#[derive(Debug, Default)]
struct Mailbox {
    running: bool,
    pending: Vec<SubagentReport>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One logical conversation, root or subagent
pub struct Session {
    id: String,
    depth: u32,
    parent: Option<Weak<Session>>,
    metadata: Mutex<SessionMetadata>,
    memory: tokio::sync::Mutex<MemoryManager>,
    mailbox: tokio::sync::Mutex<Mailbox>,
    cancel: Mutex<CancellationToken>,
    tools: ToolView,
    supervisor: SubagentSupervisor,
}

impl Session {
    pub fn new(
        metadata: SessionMetadata,
        parent: Option<Weak<Session>>,
        memory: MemoryManager,
        tools: ToolView,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: metadata.session_id.clone(),
            depth: metadata.depth,
            parent,
            metadata: Mutex::new(metadata),
            memory: tokio::sync::Mutex::new(memory),
            mailbox: tokio::sync::Mutex::new(Mailbox::default()),
            cancel: Mutex::new(cancel),
            tools,
            supervisor: SubagentSupervisor::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_subagent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn parent_id(&self) -> Option<String> {
        lock(&self.metadata).parent_session_id.clone()
    }

    /// Parent session, if it is still alive
    pub fn parent(&self) -> Option<Arc<Session>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.metadata).status
    }

    pub fn set_status(&self, status: SessionStatus) {
        lock(&self.metadata).set_status(status);
    }

    /// Snapshot of the metadata
    pub fn metadata(&self) -> SessionMetadata {
        lock(&self.metadata).clone()
    }

    pub fn update_metadata(&self, update: impl FnOnce(&mut SessionMetadata)) {
        let mut metadata = lock(&self.metadata);
        update(&mut metadata);
        metadata.touch();
    }

    pub fn memory(&self) -> &tokio::sync::Mutex<MemoryManager> {
        &self.memory
    }

    pub fn tools(&self) -> &ToolView {
        &self.tools
    }

    pub fn supervisor(&self) -> &SubagentSupervisor {
        &self.supervisor
    }

    /// Token of the current run
    pub fn cancel_token(&self) -> CancellationToken {
        lock(&self.cancel).clone()
    }

    /// Cancel the current run and, through child tokens, every descendant
    pub fn cancel(&self) {
        tracing::info!(session_id = %self.id, "[Session] Cancelling");
        lock(&self.cancel).cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        lock(&self.cancel).is_cancelled()
    }

    /// Install a fresh token before resuming a cancelled session
    pub fn reset_cancel(&self, token: CancellationToken) {
        *lock(&self.cancel) = token;
    }

    /// Copy of the full transcript
    pub async fn transcript(&self) -> Vec<Message> {
        self.memory.lock().await.messages().to_vec()
    }

    /// Mark the session as running a loop
    pub async fn begin_run(&self) -> AgentResult<()> {
        let mut mailbox = self.mailbox.lock().await;
        if mailbox.running {
            return Err(AgentError::SessionBusy(self.id.clone()));
        }
        mailbox.running = true;
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.mailbox.lock().await.running
    }

    /// Hand a child's outcome to this session.
    ///
    /// Queued while a run is in progress, appended at once otherwise.
    pub async fn deliver_report(&self, report: SubagentReport) {
        let mut mailbox = self.mailbox.lock().await;
        if mailbox.running {
            tracing::debug!(
                session_id = %self.id,
                child_id = %report.session_id,
                "[Session] Queued subagent report"
            );
            mailbox.pending.push(report);
        } else {
            self.memory.lock().await.append(Draft::subagent_report(report));
        }
    }

    /// Append queued reports; returns how many were appended
    pub async fn drain_reports(&self) -> usize {
        let mut mailbox = self.mailbox.lock().await;
        if mailbox.pending.is_empty() {
            return 0;
        }
        let mut memory = self.memory.lock().await;
        let count = mailbox.pending.len();
        for report in mailbox.pending.drain(..) {
            memory.append(Draft::subagent_report(report));
        }
        count
    }

    /// Drain queued reports, write the terminal marker and leave the running state
    pub async fn end_run(&self, status: SessionStatus, reason: &str) -> Message {
        let mut mailbox = self.mailbox.lock().await;
        let mut memory = self.memory.lock().await;
        for report in mailbox.pending.drain(..) {
            memory.append(Draft::subagent_report(report));
        }
        let marker = memory.append(Draft::terminal(status, reason));
        mailbox.running = false;
        marker
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("depth", &self.depth)
            .field("status", &self.status())
            .field("tools", &self.tools.tool_names())
            .field("supervisor", &self.supervisor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Payload, WindowConfig};
    use crate::tools::ToolRegistry;

    fn session() -> Arc<Session> {
        Session::new(
            SessionMetadata::new("s1"),
            None,
            MemoryManager::new("s1", WindowConfig::default(), None),
            ToolView::all(Arc::new(ToolRegistry::new())),
            CancellationToken::new(),
        )
    }

    fn report(id: &str) -> SubagentReport {
        SubagentReport {
            session_id: id.into(),
            task: "t".into(),
            status: SessionStatus::Completed,
            result: Some("ok".into()),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_begin_run_twice_is_busy() {
        let s = session();
        s.begin_run().await.unwrap();
        assert!(matches!(s.begin_run().await, Err(AgentError::SessionBusy(_))));
        s.end_run(SessionStatus::Completed, "done").await;
        assert!(s.begin_run().await.is_ok());
    }

    #[tokio::test]
    async fn test_reports_queue_while_running() {
        let s = session();
        s.begin_run().await.unwrap();
        s.memory().lock().await.append(Draft::user("go"));

        s.deliver_report(report("c1")).await;
        assert_eq!(s.transcript().await.len(), 1);

        assert_eq!(s.drain_reports().await, 1);
        assert_eq!(s.drain_reports().await, 0);
        let transcript = s.transcript().await;
        assert!(matches!(
            transcript[1].payload,
            Some(Payload::SubagentReport { .. })
        ));
    }

    #[tokio::test]
    async fn test_end_run_drains_then_marks() {
        let s = session();
        s.begin_run().await.unwrap();
        s.deliver_report(report("c1")).await;

        let marker = s.end_run(SessionStatus::Cancelled, "Session cancelled").await;
        assert_eq!(marker.seq, 2);
        assert_eq!(marker.terminal_status(), Some(SessionStatus::Cancelled));

        // after the run, reports go straight to the transcript
        s.deliver_report(report("c2")).await;
        let transcript = s.transcript().await;
        assert_eq!(transcript.len(), 3);
        assert!(transcript[2].content.contains("c2"));
    }

    #[test]
    fn test_reset_cancel() {
        let s = session();
        s.cancel();
        assert!(s.is_cancelled());
        s.reset_cancel(CancellationToken::new());
        assert!(!s.is_cancelled());
    }
}
