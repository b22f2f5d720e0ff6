//! Isolation scopes held for the duration of a tool call
//!
//! Each class of side effect has its own semaphore shared by every session in
//! the runtime. The executor holds an [`IsolationGuard`] while the handler
//! runs; dropping the guard (normal return, timeout, panic) releases the slot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::ToolError;

/// Resource class a tool needs while it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Pure computation or engine-internal work
    #[default]
    None,
    /// Reads or writes inside the workspace
    Filesystem,
    /// Starts a child process
    Subprocess,
    /// Talks to the network
    Network,
}

/// Concurrent holders allowed per isolation class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationLimits {
    pub filesystem: usize,
    pub subprocess: usize,
    pub network: usize,
}

impl Default for IsolationLimits {
    fn default() -> Self {
        Self {
            filesystem: 16,
            subprocess: 4,
            network: 8,
        }
    }
}

/// Runtime-wide semaphores, one per isolation class
#[derive(Debug)]
pub struct IsolationScopes {
    filesystem: Arc<Semaphore>,
    subprocess: Arc<Semaphore>,
    network: Arc<Semaphore>,
}

impl IsolationScopes {
    pub fn new(limits: &IsolationLimits) -> Self {
        Self {
            filesystem: Arc::new(Semaphore::new(limits.filesystem.max(1))),
            subprocess: Arc::new(Semaphore::new(limits.subprocess.max(1))),
            network: Arc::new(Semaphore::new(limits.network.max(1))),
        }
    }

    fn semaphore(&self, isolation: Isolation) -> Option<&Arc<Semaphore>> {
        match isolation {
            Isolation::None => None,
            Isolation::Filesystem => Some(&self.filesystem),
            Isolation::Subprocess => Some(&self.subprocess),
            Isolation::Network => Some(&self.network),
        }
    }

    /// Wait for a slot of the given class
    pub async fn acquire(&self, isolation: Isolation) -> Result<IsolationGuard, ToolError> {
        let permit = match self.semaphore(isolation) {
            Some(semaphore) => Some(
                semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ToolError::failed("isolation scope closed"))?,
            ),
            None => None,
        };
        tracing::trace!(?isolation, "[Isolation] Acquired scope");
        Ok(IsolationGuard {
            isolation,
            _permit: permit,
        })
    }

    /// Free slots of a class (`usize::MAX` for [`Isolation::None`])
    pub fn available(&self, isolation: Isolation) -> usize {
        self.semaphore(isolation)
            .map(|s| s.available_permits())
            .unwrap_or(usize::MAX)
    }
}

impl Default for IsolationScopes {
    fn default() -> Self {
        Self::new(&IsolationLimits::default())
    }
}

/// Held while a handler runs
#[derive(Debug)]
pub struct IsolationGuard {
    isolation: Isolation,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Drop for IsolationGuard {
    fn drop(&mut self) {
        tracing::trace!(isolation = ?self.isolation, "[Isolation] Released scope");
    }
}
