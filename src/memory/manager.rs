//! Per-session transcript owner
//!
//! Append is the only mutation. Every appended message gets the next sequence
//! number, so a transcript is always gapless and ordered by causality.

use std::sync::Arc;

use chrono::Utc;

use crate::core::{AgentError, AgentResult};

use super::message::{Draft, Message};
use super::store::TranscriptStore;
use super::window::{summarize, ContextWindow, WindowConfig};

/// Transcript and context window of one session
pub struct MemoryManager {
    session_id: String,
    messages: Vec<Message>,
    next_seq: u64,
    window: WindowConfig,
    store: Option<Arc<dyn TranscriptStore>>,
}

impl MemoryManager {
    /// Create an empty transcript
    pub fn new(
        session_id: impl Into<String>,
        window: WindowConfig,
        store: Option<Arc<dyn TranscriptStore>>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            next_seq: 1,
            window,
            store,
        }
    }

    /// Rebuild a transcript from its store
    pub fn restore(
        session_id: impl Into<String>,
        window: WindowConfig,
        store: Arc<dyn TranscriptStore>,
    ) -> AgentResult<Self> {
        let session_id = session_id.into();
        let messages = store.load(&session_id)?;

        for (expected, message) in (1u64..).zip(&messages) {
            if message.seq != expected {
                return Err(AgentError::other(format!(
                    "transcript {} has a gap: expected seq {}, found {}",
                    session_id, expected, message.seq
                )));
            }
        }

        let next_seq = messages.len() as u64 + 1;
        Ok(Self {
            session_id,
            messages,
            next_seq,
            window,
            store: Some(store),
        })
    }

    /// Append a message and return it with its sequence number
    pub fn append(&mut self, draft: Draft) -> Message {
        self.append_with(|_| draft)
    }

    /// Append a message whose contents depend on its own sequence number
    pub fn append_with(&mut self, build: impl FnOnce(u64) -> Draft) -> Message {
        let seq = self.next_seq;
        let draft = build(seq);
        let message = Message {
            seq,
            role: draft.role,
            content: draft.content,
            payload: draft.payload,
            timestamp: Utc::now(),
            pinned: draft.pinned,
        };
        self.next_seq += 1;

        if let Some(store) = &self.store {
            if let Err(e) = store.append(&self.session_id, &message) {
                tracing::warn!(
                    session_id = %self.session_id,
                    seq,
                    "[MemoryManager] Failed to write message through to store: {}",
                    e
                );
            }
        }

        tracing::debug!(
            session_id = %self.session_id,
            seq,
            role = %message.role,
            "[MemoryManager] Appended message"
        );
        self.messages.push(message.clone());
        message
    }

    /// Bounded view of the transcript fed to the model
    pub fn windowed_read(&self) -> ContextWindow {
        ContextWindow::build(&self.messages, &self.window)
    }

    /// Summary of all non-pinned messages up to and including `upto_seq`.
    ///
    /// The transcript itself is not changed.
    pub fn summarize(&self, upto_seq: u64) -> Option<Message> {
        let run: Vec<Message> = self
            .messages
            .iter()
            .filter(|m| m.seq <= upto_seq && !m.pinned)
            .cloned()
            .collect();
        summarize(&run, &self.window)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn window_config(&self) -> &WindowConfig {
        &self.window
    }
}

impl std::fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryManager")
            .field("session_id", &self.session_id)
            .field("messages", &self.messages.len())
            .field("next_seq", &self.next_seq)
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::message::{Payload, Role, ToolCall};
    use crate::memory::store::InMemoryStore;
    use serde_json::json;

    #[test]
    fn test_append_assigns_gapless_seq() {
        let mut memory = MemoryManager::new("s1", WindowConfig::default(), None);
        let a = memory.append(Draft::user("hello"));
        let b = memory.append(Draft::assistant("hi"));
        assert_eq!((a.seq, b.seq), (1, 2));
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.last().unwrap().content, "hi");
    }

    #[test]
    fn test_append_with_sees_own_seq() {
        let mut memory = MemoryManager::new("s1", WindowConfig::default(), None);
        memory.append(Draft::user("run ls"));
        let msg = memory.append_with(|seq| {
            Draft::assistant("").with_payload(Payload::ToolCalls {
                calls: vec![ToolCall {
                    call_id: "c1".into(),
                    tool_name: "exec".into(),
                    arguments: json!({"command": "ls"}),
                    origin_seq: seq,
                }],
            })
        });
        assert_eq!(msg.tool_calls()[0].origin_seq, msg.seq);
    }

    #[test]
    fn test_write_through_and_restore() {
        let store: Arc<dyn TranscriptStore> = Arc::new(InMemoryStore::new());
        let mut memory = MemoryManager::new("s1", WindowConfig::default(), Some(store.clone()));
        memory.append(Draft::system("rules").pinned());
        memory.append(Draft::user("hello"));

        let mut restored = MemoryManager::restore("s1", WindowConfig::default(), store).unwrap();
        assert_eq!(restored.messages(), memory.messages());
        let next = restored.append(Draft::user("again"));
        assert_eq!(next.seq, 3);
        assert!(restored.messages()[0].pinned);
    }

    #[test]
    fn test_restore_unknown_session() {
        let store: Arc<dyn TranscriptStore> = Arc::new(InMemoryStore::new());
        let err = MemoryManager::restore("missing", WindowConfig::default(), store).unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
    }

    #[test]
    fn test_summarize_skips_pinned_and_keeps_transcript() {
        let mut memory = MemoryManager::new("s1", WindowConfig::default(), None);
        memory.append(Draft::system("rules").pinned());
        memory.append(Draft::user("one"));
        memory.append(Draft::assistant("two"));
        memory.append(Draft::user("three"));

        let summary = memory.summarize(3).unwrap();
        assert_eq!(summary.role, Role::System);
        assert!(matches!(
            summary.payload,
            Some(Payload::Summary { first_seq: 2, last_seq: 3, count: 2 })
        ));
        assert_eq!(memory.len(), 4);
    }
}
