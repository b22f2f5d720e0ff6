//! TriggerHandle - External interface for a run started in the background
//!
//! Returned by `AgentRuntime::spawn_trigger`. It lets the caller:
//! - Read the session id before the run finishes
//! - Cancel the run
//! - Subscribe to runtime events
//! - Wait for the response

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::core::{AgentError, AgentResult, SessionStatus};
use crate::memory::Message;
use crate::session::Session;

use super::channels::EventReceiver;
use super::runtime::TriggerResponse;

/// Handle for one background run of a session
#[derive(Debug)]
pub struct TriggerHandle {
    session: Arc<Session>,
    task: JoinHandle<TriggerResponse>,
    events: EventReceiver,
}

impl TriggerHandle {
    pub(crate) fn new(
        session: Arc<Session>,
        task: JoinHandle<TriggerResponse>,
        events: EventReceiver,
    ) -> Self {
        Self {
            session,
            task,
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Request cancellation; the run ends at its next safe point
    pub fn cancel(&self) {
        self.session.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Events published since the run started
    pub fn events(&mut self) -> &mut EventReceiver {
        &mut self.events
    }

    pub async fn transcript(&self) -> Vec<Message> {
        self.session.transcript().await
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> AgentResult<TriggerResponse> {
        self.task
            .await
            .map_err(|e| AgentError::other(format!("run task failed: {}", e)))
    }
}
