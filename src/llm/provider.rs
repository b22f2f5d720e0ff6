//! Model provider trait and error classification
//!
//! The agent loop only needs one call: send a context window with tool schemas
//! and get back either a final answer or tool calls. Errors are classified by
//! status and category, never by message text, so the loop can decide whether
//! to retry.

use thiserror::Error;

use super::types::{ModelRequest, ModelResponse};

/// Errors returned by a provider adapter
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid or expired credentials
    #[error("Auth error: {message}")]
    Auth { message: String },

    /// Account quota or billing limit reached
    #[error("Quota exceeded: {message}")]
    Quota { message: String },

    /// Rate limited by the provider
    #[error("Rate limited: {message}")]
    RateLimited {
        retry_after_ms: Option<u64>,
        message: String,
    },

    /// Provider returned an error status
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
        retryable: bool,
    },

    /// The call did not complete within the configured timeout
    #[error("Provider call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The response was well-formed JSON but not a usable completion
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// The session was cancelled while waiting
    #[error("Provider call cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Whether the same request may succeed if sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::RateLimited { .. } | ProviderError::Timeout { .. } => true,
            ProviderError::Api { retryable, .. } => *retryable,
            ProviderError::Json(_)
            | ProviderError::Auth { .. }
            | ProviderError::Quota { .. }
            | ProviderError::InvalidResponse { .. }
            | ProviderError::Cancelled => false,
        }
    }

    /// Provider-suggested delay before the next attempt
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Short category name for logs
    pub fn category(&self) -> &'static str {
        match self {
            ProviderError::Http(_) => "network",
            ProviderError::Json(_) | ProviderError::InvalidResponse { .. } => "invalid_response",
            ProviderError::Auth { .. } => "auth",
            ProviderError::Quota { .. } => "quota",
            ProviderError::RateLimited { .. } => "rate_limit",
            ProviderError::Api { status, .. } if *status >= 500 => "server",
            ProviderError::Api { .. } => "api",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::Cancelled => "cancelled",
        }
    }
}

/// A model backend the agent loop can drive
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Run one completion
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError>;

    /// Get the provider name (e.g., "openai", "scripted").
    fn provider_name(&self) -> &str;
}
