//! Runtime event channel
//!
//! Every session in a runtime publishes lifecycle events on one broadcast
//! channel. Subscribers get either a raw receiver or a stream that skips over
//! lag.

use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::SessionStatus;
use crate::tools::SpawnPolicy;

/// Default buffer size for the event broadcast channel
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// Lifecycle event published by the runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A session began a run
    SessionStarted {
        session_id: String,
        parent_id: Option<String>,
        depth: u32,
    },
    ToolStarted {
        session_id: String,
        call_id: String,
        tool: String,
    },
    ToolFinished {
        session_id: String,
        call_id: String,
        tool: String,
        is_error: bool,
        duration_ms: u64,
    },
    SubagentSpawned {
        parent_id: String,
        child_id: String,
        policy: SpawnPolicy,
    },
    /// A child reached a terminal state
    SubagentReported {
        parent_id: String,
        child_id: String,
        status: SessionStatus,
    },
    /// A run ended; the terminal marker is already in the transcript
    SessionFinished {
        session_id: String,
        status: SessionStatus,
    },
}

/// Sender half of the event broadcast channel
pub type EventSender = broadcast::Sender<RuntimeEvent>;

/// Receiver half of the event broadcast channel
pub type EventReceiver = broadcast::Receiver<RuntimeEvent>;

/// Shared publisher for runtime events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: EventSender,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; having no subscribers is fine
    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    /// Event stream that ends when the runtime is dropped
    pub fn stream(&self) -> impl Stream<Item = RuntimeEvent> {
        let mut rx = self.tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("[EventBus] Subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_SIZE)
    }
}
