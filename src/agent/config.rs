//! Runtime configuration
//!
//! One [`RuntimeConfig`] is built at startup (by hand with the `with_*`
//! builder, or deserialized by an external loader) and shared by `Arc` with
//! every session, tool executor and supervisor. Durations are expressed in
//! milliseconds when serialized.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::AgentError;
use crate::llm::{RetryPolicy, SamplingParams};
use crate::memory::WindowConfig;
use crate::tools::IsolationLimits;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Rejected configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be at least {min}")]
    TooSmall { field: &'static str, min: u64 },

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

impl From<ConfigError> for AgentError {
    fn from(err: ConfigError) -> Self {
        AgentError::FatalConfig(err.to_string())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Model endpoint and credentials
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_base: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
}

impl ProviderConfig {
    /// Read `ZERGBOT_API_KEY` (or `OPENAI_API_KEY`), `ZERGBOT_API_BASE` and
    /// `ZERGBOT_MODEL`, falling back to the defaults.
    pub fn from_env() -> Self {
        let api_key = std::env::var("ZERGBOT_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.is_empty());
        Self {
            api_base: std::env::var("ZERGBOT_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into()),
            api_key,
            model: std::env::var("ZERGBOT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into()),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.into(),
            api_key: None,
            model: DEFAULT_MODEL.into(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("model", &self.model)
            .finish()
    }
}

/// Configuration for the engine
///
/// ```ignore
/// let config = RuntimeConfig::default()
///     .with_model("gpt-4o")
///     .with_max_steps(30)
///     .with_max_spawn_depth(2)
///     .with_tool_timeout("exec", Duration::from_secs(120));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub provider: ProviderConfig,
    pub sampling: SamplingParams,

    /// System prompt pinned at the start of every root session
    pub system_prompt: String,

    /// Steps per run before the session fails with `StepBudgetExceeded`
    pub max_steps: usize,
    /// Step budget of subagent runs
    pub subagent_max_steps: usize,

    /// Context window accounting, including the token ceiling
    pub window: WindowConfig,

    /// Deepest allowed session (root is 0)
    pub max_spawn_depth: u32,
    /// Active children per parent session
    pub max_concurrent_subagents: usize,
    /// Sessions allowed to run a step at the same time
    pub worker_pool_size: usize,
    /// Tool calls run concurrently within one step
    pub max_parallel_tools: usize,
    pub isolation: IsolationLimits,

    #[serde(with = "duration_ms", rename = "provider_timeout_ms")]
    pub provider_timeout: Duration,
    pub retry: RetryPolicy,

    #[serde(with = "duration_ms", rename = "default_tool_timeout_ms")]
    pub default_tool_timeout: Duration,
    /// Per-tool timeout overrides in milliseconds
    #[serde(rename = "tool_timeouts_ms")]
    pub tool_timeouts: HashMap<String, u64>,

    /// Time cancelled children get to finish before they are aborted
    #[serde(with = "duration_ms", rename = "cancel_grace_period_ms")]
    pub cancel_grace_period: Duration,
    /// Join timeout when a spawn request does not give one
    #[serde(with = "duration_ms", rename = "subagent_join_timeout_ms")]
    pub subagent_join_timeout: Duration,
    /// Newest non-pinned parent messages copied into a child's context
    pub subagent_inherited_messages: usize,

    /// Root for filesystem and shell tools
    pub workspace: PathBuf,
    /// Directory for JSONL transcripts; `None` keeps transcripts in memory
    pub transcript_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            sampling: SamplingParams::default(),
            system_prompt: "You are a helpful assistant. Use the available tools when they help \
                            you complete the task, then give a concise final answer."
                .into(),
            max_steps: 20,
            subagent_max_steps: 15,
            window: WindowConfig::default(),
            max_spawn_depth: 2,
            max_concurrent_subagents: 4,
            worker_pool_size: 8,
            max_parallel_tools: 4,
            isolation: IsolationLimits::default(),
            provider_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            default_tool_timeout: Duration::from_secs(60),
            tool_timeouts: HashMap::new(),
            cancel_grace_period: Duration::from_secs(5),
            subagent_join_timeout: Duration::from_secs(300),
            subagent_inherited_messages: 0,
            workspace: PathBuf::from("."),
            transcript_dir: None,
        }
    }
}

impl RuntimeConfig {
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.provider.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_subagent_max_steps(mut self, max_steps: usize) -> Self {
        self.subagent_max_steps = max_steps;
        self
    }

    pub fn with_max_context_tokens(mut self, max_tokens: usize) -> Self {
        self.window.max_tokens = max_tokens;
        self
    }

    pub fn with_max_spawn_depth(mut self, depth: u32) -> Self {
        self.max_spawn_depth = depth;
        self
    }

    pub fn with_max_concurrent_subagents(mut self, max: usize) -> Self {
        self.max_concurrent_subagents = max;
        self
    }

    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    pub fn with_max_parallel_tools(mut self, max: usize) -> Self {
        self.max_parallel_tools = max;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_default_tool_timeout(mut self, timeout: Duration) -> Self {
        self.default_tool_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, tool: impl Into<String>, timeout: Duration) -> Self {
        self.tool_timeouts.insert(tool.into(), timeout.as_millis() as u64);
        self
    }

    pub fn with_cancel_grace_period(mut self, grace: Duration) -> Self {
        self.cancel_grace_period = grace;
        self
    }

    pub fn with_subagent_join_timeout(mut self, timeout: Duration) -> Self {
        self.subagent_join_timeout = timeout;
        self
    }

    pub fn with_subagent_inherited_messages(mut self, count: usize) -> Self {
        self.subagent_inherited_messages = count;
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_transcript_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transcript_dir = Some(dir.into());
        self
    }

    /// Configured override for one tool
    pub fn tool_timeout(&self, tool: &str) -> Option<Duration> {
        self.tool_timeouts.get(tool).copied().map(Duration::from_millis)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn at_least(field: &'static str, value: u64, min: u64) -> Result<(), ConfigError> {
            if value < min {
                Err(ConfigError::TooSmall { field, min })
            } else {
                Ok(())
            }
        }

        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Empty("provider.model"));
        }
        at_least("max_steps", self.max_steps as u64, 1)?;
        at_least("subagent_max_steps", self.subagent_max_steps as u64, 1)?;
        at_least("window.max_tokens", self.window.max_tokens as u64, 64)?;
        at_least("window.chars_per_token", self.window.chars_per_token as u64, 1)?;
        at_least("worker_pool_size", self.worker_pool_size as u64, 1)?;
        at_least("max_parallel_tools", self.max_parallel_tools as u64, 1)?;
        at_least("retry.max_attempts", self.retry.max_attempts as u64, 1)?;
        at_least("provider_timeout_ms", self.provider_timeout.as_millis() as u64, 1)?;
        at_least("default_tool_timeout_ms", self.default_tool_timeout.as_millis() as u64, 1)?;
        at_least("subagent_join_timeout_ms", self.subagent_join_timeout.as_millis() as u64, 1)?;
        Ok(())
    }
}
