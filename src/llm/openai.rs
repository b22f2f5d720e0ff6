//! OpenAI-compatible chat completions adapter
//!
//! Works with any endpoint that speaks the `/chat/completions` protocol
//! (OpenAI, OpenRouter, vLLM, local gateways). Tool calls come back with their
//! arguments as a JSON string; a string that does not parse is passed to the
//! tool as `{"raw": "..."}` so argument validation can report it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::agent::config::ProviderConfig;
use crate::memory::Role;

use super::provider::{ModelProvider, ProviderError};
use super::types::{ChatMessage, ModelRequest, ModelResponse, ModelToolCall, ToolSchema};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider backed by an OpenAI-compatible HTTP API
pub struct OpenAiProvider {
    client: Client,
    api_base: String,
    api_key: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireErrorBody {
    error: WireError,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<Value>,
}

fn to_wire(message: &ChatMessage) -> WireMessage {
    let tool_calls = (!message.tool_calls.is_empty()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|c| WireToolCall {
                id: c.id.clone(),
                kind: function_type(),
                function: WireFunction {
                    name: c.name.clone(),
                    arguments: c.arguments.to_string(),
                },
            })
            .collect()
    });
    WireMessage {
        role: message.role,
        content: Some(message.content.clone()),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn tool_to_wire(tool: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw": raw }))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let seconds: f64 = value.trim().parse().ok()?;
    (seconds >= 0.0).then(|| (seconds * 1000.0) as u64)
}

/// Map an error status to a classified provider error
fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> ProviderError {
    let (message, kind, code) = match serde_json::from_str::<WireErrorBody>(body) {
        Ok(parsed) => {
            let code = parsed.error.code.map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            });
            (parsed.error.message, parsed.error.kind, code)
        }
        Err(_) => (body.chars().take(500).collect(), None, None),
    };
    let is_quota = [kind.as_deref(), code.as_deref()]
        .iter()
        .any(|v| *v == Some("insufficient_quota"));

    match status.as_u16() {
        401 | 403 => ProviderError::Auth { message },
        402 => ProviderError::Quota { message },
        429 if is_quota => ProviderError::Quota { message },
        429 => ProviderError::RateLimited {
            retry_after_ms: parse_retry_after(headers),
            message,
        },
        s => ProviderError::Api {
            status: s,
            message,
            code,
            retryable: s == 408 || s == 409 || s >= 500,
        },
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let body = WireRequest {
            model: &request.model,
            messages: request.messages.iter().map(to_wire).collect(),
            tools: request.tools.iter().map(tool_to_wire).collect(),
            tool_choice: (!request.tools.is_empty()).then_some("auto"),
            temperature: request.sampling.temperature,
            max_tokens: request.sampling.max_tokens,
        };

        tracing::debug!(
            "[OpenAi] Sending request: model={}, messages={}, tools={}",
            request.model,
            body.messages.len(),
            body.tools.len()
        );

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        tracing::debug!("[OpenAi] Response status: {}", status);

        if !status.is_success() {
            let err = classify(status, &headers, &text);
            tracing::error!(
                "[OpenAi] API error: {} - {}",
                status,
                crate::security::mask_sensitive(&err.to_string())
            );
            return Err(err);
        }

        let parsed: WireResponse = serde_json::from_str(&text)?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse {
                message: "response has no choices".into(),
            })?;

        let text = choice.message.content.filter(|c| !c.is_empty());
        let calls: Vec<ModelToolCall> = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ModelToolCall {
                id: c.id,
                name: c.function.name,
                arguments: parse_arguments(&c.function.arguments),
            })
            .collect();

        if calls.is_empty() {
            Ok(ModelResponse::Final {
                text: text.unwrap_or_default(),
            })
        } else {
            Ok(ModelResponse::ToolCalls { text, calls })
        }
    }

    fn provider_name(&self) -> &str {
        "openai"
    }
}
