//! Per-session metadata, persisted next to the transcript

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::SessionStatus;

/// Identity, lineage and lifecycle of one session.
///
/// Kept small so listing sessions never has to read a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,

    /// Subagent task, or the first input a root session received
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// 0 for root sessions
    pub depth: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,

    #[serde(default)]
    pub child_session_ids: Vec<String>,

    pub status: SessionStatus,

    #[serde(default)]
    pub model: String,

    /// Triggers handled so far
    #[serde(default)]
    pub runs: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Set when the last run reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Trigger metadata, merged across runs
    #[serde(default)]
    pub custom: HashMap<String, Value>,
}

impl SessionMetadata {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            task: None,
            depth: 0,
            parent_session_id: None,
            child_session_ids: Vec::new(),
            status: SessionStatus::Active,
            model: String::new(),
            runs: 0,
            created_at: now,
            updated_at: now,
            finished_at: None,
            custom: HashMap::new(),
        }
    }

    /// Metadata for a child session at `depth`, started with `task`
    pub fn new_subagent(
        session_id: impl Into<String>,
        parent_session_id: impl Into<String>,
        depth: u32,
        task: impl Into<String>,
    ) -> Self {
        Self {
            task: Some(task.into()),
            depth,
            parent_session_id: Some(parent_session_id.into()),
            runs: 1,
            ..Self::new(session_id)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn is_subagent(&self) -> bool {
        self.parent_session_id.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Mark a new run: active again, first input kept as the task, trigger
    /// metadata merged over what earlier runs supplied
    pub fn start_run(&mut self, input: &str, custom: &HashMap<String, Value>) {
        self.runs += 1;
        self.status = SessionStatus::Active;
        self.finished_at = None;
        if self.task.is_none() {
            self.task = Some(input.to_string());
        }
        self.custom
            .extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.touch();
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
        self.finished_at = status.is_terminal().then(Utc::now);
        self.touch();
    }

    pub fn add_child(&mut self, child_session_id: impl Into<String>) {
        self.child_session_ids.push(child_session_id.into());
        self.touch();
    }

    pub fn get_custom(&self, key: &str) -> Option<&Value> {
        self.custom.get(key)
    }
}
