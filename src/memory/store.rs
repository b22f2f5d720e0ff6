//! Write-through persistence for transcripts

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::{AgentError, AgentResult};

use super::message::Message;

/// Backend that receives every appended message.
///
/// The memory manager never reads back through the store during a run; `load`
/// is only used when a session is restored.
pub trait TranscriptStore: Send + Sync {
    fn append(&self, session_id: &str, message: &Message) -> AgentResult<()>;

    fn load(&self, session_id: &str) -> AgentResult<Vec<Message>>;
}

/// Process-local store, used in tests and when no persistence is configured
#[derive(Debug, Default)]
pub struct InMemoryStore {
    transcripts: Mutex<HashMap<String, Vec<Message>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TranscriptStore for InMemoryStore {
    fn append(&self, session_id: &str, message: &Message) -> AgentResult<()> {
        let mut transcripts = self
            .transcripts
            .lock()
            .map_err(|_| AgentError::other("transcript store lock poisoned"))?;
        transcripts
            .entry(session_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    fn load(&self, session_id: &str) -> AgentResult<Vec<Message>> {
        let transcripts = self
            .transcripts
            .lock()
            .map_err(|_| AgentError::other("transcript store lock poisoned"))?;
        transcripts
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound(session_id.to_string()))
    }
}
