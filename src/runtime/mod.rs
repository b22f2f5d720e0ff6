//! Agent runtime and supervision
//!
//! This module provides the infrastructure for running sessions:
//! - `AgentRuntime` - Turns triggers into runs and keeps the root sessions
//! - `TriggerHandle` - External interface for a run started in the background
//! - `SubagentSupervisor` - Spawns, joins and cancels child sessions
//! - `Engine` - Configuration, provider, tools and limits shared by all sessions
//! - `WorkerPool` - Bounds how many sessions run a step at once
//! - `EventBus` - Broadcast channel of runtime events
//!
//! Every session run is a tokio task; a root run may also be awaited inline.

pub mod channels;
pub mod engine;
pub mod handle;
pub mod pool;
#[allow(clippy::module_inception)]
pub mod runtime;
pub mod supervisor;

pub use channels::{EventBus, EventReceiver, RuntimeEvent};
pub use engine::Engine;
pub use handle::TriggerHandle;
pub use pool::{WorkerPool, WorkerSlot};
pub use runtime::{AgentRuntime, SessionTarget, Trigger, TriggerResponse};
pub use supervisor::{SessionSpawner, SubagentHandle, SubagentSupervisor};
