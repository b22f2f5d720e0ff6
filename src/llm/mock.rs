//! Scripted provider for tests and local runs without an API key
//!
//! Replies are consumed from a queue; once it is empty the optional fallback
//! closure answers every request.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::provider::{ModelProvider, ProviderError};
use super::types::{ModelRequest, ModelResponse};

type Responder = Box<dyn Fn(&ModelRequest) -> Result<ModelResponse, ProviderError> + Send + Sync>;

enum Step {
    Respond(ModelResponse),
    Fail(ProviderError),
    Delay(Duration, ModelResponse),
    Hang,
}

/// Provider that replays a fixed script
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    fallback: Option<Responder>,
    requests: Mutex<Vec<ModelRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with a closure
    pub fn from_fn<F>(respond: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<ModelResponse, ProviderError> + Send + Sync + 'static,
    {
        Self::new().otherwise(respond)
    }

    pub fn then_respond(self, response: ModelResponse) -> Self {
        self.push(Step::Respond(response))
    }

    pub fn then_fail(self, err: ProviderError) -> Self {
        self.push(Step::Fail(err))
    }

    pub fn then_delay(self, delay: Duration, response: ModelResponse) -> Self {
        self.push(Step::Delay(delay, response))
    }

    /// Never answer the next request
    pub fn then_hang(self) -> Self {
        self.push(Step::Hang)
    }

    pub fn otherwise<F>(mut self, respond: F) -> Self
    where
        F: Fn(&ModelRequest) -> Result<ModelResponse, ProviderError> + Send + Sync + 'static,
    {
        self.fallback = Some(Box::new(respond));
        self
    }

    fn push(self, step: Step) -> Self {
        lock(&self.script).push_back(step);
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ModelRequest> {
        lock(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        lock(&self.requests).push(request.clone());
        let step = lock(&self.script).pop_front();

        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Delay(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Step::Hang) => std::future::pending().await,
            None => match &self.fallback {
                Some(respond) => respond(&request),
                None => Err(ProviderError::InvalidResponse {
                    message: "script exhausted".into(),
                }),
            },
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}
