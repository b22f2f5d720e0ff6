//! Provider call with timeout, cancellation and exponential backoff

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::provider::{ModelProvider, ProviderError};
use super::types::{ModelRequest, ModelResponse};

/// Retry policy for retryable provider errors.
///
/// The delay before retry `n` (0-based) is `base_delay_ms * 2^n`, capped at
/// `max_delay_ms`. A `Retry-After` hint from the provider wins when larger,
/// but never past `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry, ignoring provider hints
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn delay_for(&self, retry: u32, err: &ProviderError) -> Duration {
        let backoff = self.backoff(retry);
        match err.retry_after_ms() {
            Some(hint) => backoff.max(Duration::from_millis(hint.min(self.max_delay_ms))),
            None => backoff,
        }
    }
}

/// Call the provider until it succeeds, fails fatally, or attempts run out.
///
/// Every attempt is bounded by `timeout`. Cancellation aborts the in-flight
/// call and any pending backoff immediately.
pub async fn complete_with_retry(
    provider: &dyn ModelProvider,
    request: &ModelRequest,
    policy: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ModelResponse, ProviderError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let call = tokio::time::timeout(timeout, provider.complete(request.clone()));
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            outcome = call => outcome.unwrap_or(Err(ProviderError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            })),
        };

        let err = match result {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.delay_for(attempt - 1, &err);
        tracing::warn!(
            provider = provider.provider_name(),
            attempt,
            max_attempts,
            category = err.category(),
            delay_ms = delay.as_millis() as u64,
            "[Retry] Provider call failed, retrying: {}",
            crate::security::mask_sensitive(&err.to_string())
        );

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
        }
    }
}
