//! Services shared by every session of a runtime

use std::sync::Arc;

use crate::agent::RuntimeConfig;
use crate::core::AgentResult;
use crate::llm::ModelProvider;
use crate::memory::TranscriptStore;
use crate::session::{SessionMetadata, SessionStorage};
use crate::tools::{IsolationScopes, ToolRegistry};

use super::channels::{EventBus, RuntimeEvent};
use super::pool::WorkerPool;

/// Configuration, provider, tools and shared limits.
///
/// Cloning is cheap; every field is shared.
#[derive(Clone)]
pub struct Engine {
    pub config: Arc<RuntimeConfig>,
    pub provider: Arc<dyn ModelProvider>,
    pub registry: Arc<ToolRegistry>,
    pub pool: WorkerPool,
    pub scopes: Arc<IsolationScopes>,
    pub storage: Option<Arc<SessionStorage>>,
    pub events: EventBus,
}

impl Engine {
    /// Validate the configuration and build the shared services
    pub fn new(
        config: RuntimeConfig,
        provider: Arc<dyn ModelProvider>,
        registry: ToolRegistry,
    ) -> AgentResult<Self> {
        config.validate()?;

        let storage = config
            .transcript_dir
            .as_ref()
            .map(|dir| Arc::new(SessionStorage::with_dir(dir)));

        tracing::info!(
            provider = provider.provider_name(),
            model = %config.provider.model,
            tools = registry.len(),
            worker_pool_size = config.worker_pool_size,
            persistent = storage.is_some(),
            "[Engine] Initialized"
        );

        Ok(Self {
            pool: WorkerPool::new(config.worker_pool_size),
            scopes: Arc::new(IsolationScopes::new(&config.isolation)),
            config: Arc::new(config),
            provider,
            registry: Arc::new(registry),
            storage,
            events: EventBus::default(),
        })
    }

    /// Write-through target for new transcripts
    pub fn transcript_store(&self) -> Option<Arc<dyn TranscriptStore>> {
        self.storage
            .clone()
            .map(|storage| storage as Arc<dyn TranscriptStore>)
    }

    /// Persist metadata when storage is configured; failures are logged
    pub fn save_metadata(&self, metadata: &SessionMetadata) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_metadata(metadata) {
                tracing::warn!(
                    session_id = %metadata.session_id,
                    "[Engine] Failed to save session metadata: {}",
                    e
                );
            }
        }
    }

    pub fn emit(&self, event: RuntimeEvent) {
        self.events.emit(event);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("provider", &self.provider.provider_name())
            .field("tools", &self.registry.tool_names())
            .field("pool", &self.pool)
            .field("storage", &self.storage)
            .finish()
    }
}
