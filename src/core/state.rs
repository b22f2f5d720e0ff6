//! Session and step-loop state types

use serde::{Deserialize, Serialize};

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session accepts triggers or is running its loop
    #[default]
    Active,

    /// The last run ended with a final answer
    Completed,

    /// The last run ended on a provider-fatal error or an exhausted step budget
    Failed,

    /// The session was cancelled
    Cancelled,
}

impl SessionStatus {
    /// Check if the status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of the per-session step loop.
///
/// `Planning -> Executing -> Reflecting -> Planning` is one step; the loop
/// leaves through one of the three terminal phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Planning,
    Executing,
    Reflecting,
    Done,
    Failed,
    Cancelled,
}

impl LoopPhase {
    /// Check if the loop has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::Done | LoopPhase::Failed | LoopPhase::Cancelled)
    }

    /// Session status matching a terminal phase
    pub fn session_status(&self) -> Option<SessionStatus> {
        match self {
            LoopPhase::Done => Some(SessionStatus::Completed),
            LoopPhase::Failed => Some(SessionStatus::Failed),
            LoopPhase::Cancelled => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }
}

impl Default for LoopPhase {
    fn default() -> Self {
        LoopPhase::Planning
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopPhase::Planning => write!(f, "Planning"),
            LoopPhase::Executing => write!(f, "Executing"),
            LoopPhase::Reflecting => write!(f, "Reflecting"),
            LoopPhase::Done => write!(f, "Done"),
            LoopPhase::Failed => write!(f, "Failed"),
            LoopPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}
