//! Global worker pool
//!
//! A session holds a [`WorkerSlot`] only while it is runnable. The loop drops
//! its slot before awaiting the model provider or a tool batch and takes a new
//! one afterwards, so blocked sessions never starve runnable ones.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::{AgentError, AgentResult};

/// Bounds how many sessions run a step at the same time
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

/// Permission to run; released on drop
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> AgentResult<WorkerSlot> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Shutdown)?;
        Ok(WorkerSlot { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
