pub mod mock;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod types;

pub use mock::ScriptedProvider;
pub use openai::OpenAiProvider;
pub use provider::{ModelProvider, ProviderError};
pub use retry::{complete_with_retry, RetryPolicy};
pub use types::{
    ChatMessage, ModelRequest, ModelResponse, ModelToolCall, SamplingParams, ToolSchema,
};
