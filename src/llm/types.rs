//! Provider-neutral request and response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{Message, Payload, Role};

/// Sampling parameters forwarded to the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Tool description offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments
    pub parameters: Value,
}

/// Tool call as produced by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One message in the provider request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ModelToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        let mut chat = ChatMessage {
            role: message.role,
            content: message.content.clone(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        };
        match &message.payload {
            Some(Payload::ToolCalls { calls }) => {
                chat.tool_calls = calls
                    .iter()
                    .map(|c| ModelToolCall {
                        id: c.call_id.clone(),
                        name: c.tool_name.clone(),
                        arguments: c.arguments.clone(),
                    })
                    .collect();
            }
            Some(Payload::ToolResult { result }) => {
                chat.tool_call_id = Some(result.call_id.clone());
                chat.name = Some(result.tool_name.clone());
            }
            _ => {}
        }
        chat
    }
}

/// Everything the provider needs for one completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub sampling: SamplingParams,
}

/// What the model decided to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelResponse {
    /// Final answer, the run ends
    Final { text: String },
    /// One or more tool calls, optionally with accompanying text
    ToolCalls {
        text: Option<String>,
        calls: Vec<ModelToolCall>,
    },
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        ModelResponse::Final { text: text.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        ModelResponse::ToolCalls {
            text: None,
            calls: vec![ModelToolCall {
                id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                name: name.into(),
                arguments,
            }],
        }
    }
}
