//! End-to-end runs of the step loop against a scripted model

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};

use zergbot::core::{AgentError, SessionStatus, ToolError};
use zergbot::llm::{ModelResponse, ModelToolCall, ProviderError, RetryPolicy, ScriptedProvider};
use zergbot::memory::{Message, Payload, Role, WindowConfig};
use zergbot::runtime::{AgentRuntime, Trigger};
use zergbot::tools::{Tool, ToolContext, ToolRegistry};
use zergbot::RuntimeConfig;

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the text back"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(input["text"].clone())
    }
}

struct HangTool;

#[async_trait]
impl Tool for HangTool {
    fn name(&self) -> &str {
        "hang"
    }

    fn description(&self) -> &str {
        "Never returns"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        std::future::pending().await
    }
}

fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(EchoTool).unwrap();
    registry.register(HangTool).unwrap();
    registry
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
    }
}

fn runtime(config: RuntimeConfig, provider: ScriptedProvider) -> (AgentRuntime, Arc<ScriptedProvider>) {
    let provider = Arc::new(provider);
    let runtime = AgentRuntime::new(config.with_retry(fast_retry()), provider.clone(), registry()).unwrap();
    (runtime, provider)
}

fn call(id: &str, name: &str, arguments: Value) -> ModelToolCall {
    ModelToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

fn calls(calls: Vec<ModelToolCall>) -> ModelResponse {
    ModelResponse::ToolCalls { text: None, calls }
}

/// Every tool call in the transcript has exactly one result, after it
fn assert_one_result_per_call(transcript: &[Message]) {
    for message in transcript {
        for call in message.tool_calls() {
            let results: Vec<&Message> = transcript
                .iter()
                .filter(|m| m.tool_result().map(|r| r.call_id.as_str()) == Some(call.call_id.as_str()))
                .collect();
            assert_eq!(results.len(), 1, "call {} has {} results", call.call_id, results.len());
            assert!(results[0].seq > message.seq);
            assert_eq!(call.origin_seq, message.seq);
        }
    }
}

fn assert_gapless(transcript: &[Message]) {
    for (message, expected) in transcript.iter().zip(1u64..) {
        assert_eq!(message.seq, expected);
    }
}

#[tokio::test]
async fn step_budget_ends_session_with_unknown_tool_results() {
    let provider = ScriptedProvider::from_fn(|_| Ok(ModelResponse::tool_call("nonexistent", json!({}))));
    let (runtime, provider) = runtime(RuntimeConfig::default().with_max_steps(3), provider);

    let response = runtime.handle_trigger(Trigger::new("loop forever")).await.unwrap();
    assert_eq!(response.status, SessionStatus::Failed);
    assert_eq!(response.steps, 3);
    assert!(response.error.unwrap().contains("Step budget exceeded"));
    assert_eq!(provider.call_count(), 3);

    let transcript = runtime.transcript(&response.session_id).await.unwrap();
    let unknown = transcript
        .iter()
        .filter_map(|m| m.tool_result())
        .filter(|r| matches!(r.tool_error(), Some(ToolError::UnknownTool { name }) if name == "nonexistent"))
        .count();
    assert_eq!(unknown, 3);
    assert_gapless(&transcript);
    assert_one_result_per_call(&transcript);
    assert_eq!(
        transcript.last().and_then(|m| m.terminal_status()),
        Some(SessionStatus::Failed)
    );
}

#[tokio::test]
async fn hanging_tools_time_out_with_one_result_each() {
    let provider = ScriptedProvider::new()
        .then_respond(calls(vec![
            call("a", "hang", json!({})),
            call("b", "echo", json!({"text": "still here"})),
            call("c", "hang", json!({})),
        ]))
        .then_respond(ModelResponse::text("done"));
    let config = RuntimeConfig::default().with_tool_timeout("hang", Duration::from_millis(50));
    let (runtime, _) = runtime(config, provider);

    let response = runtime.handle_trigger(Trigger::new("try the tools")).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);

    let transcript = runtime.transcript(&response.session_id).await.unwrap();
    assert_one_result_per_call(&transcript);

    let results: Vec<_> = transcript.iter().filter_map(|m| m.tool_result()).collect();
    let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(results[0].tool_error(), Some(&ToolError::ToolTimeout { timeout_ms: 50 }));
    assert!(!results[1].is_error());
    assert_eq!(results[2].tool_error(), Some(&ToolError::ToolTimeout { timeout_ms: 50 }));
}

#[tokio::test]
async fn invalid_arguments_are_reported_to_the_model() {
    let provider = ScriptedProvider::new()
        .then_respond(calls(vec![call("a", "echo", json!({"wrong": 1}))]))
        .then_respond(ModelResponse::text("ok"));
    let (runtime, provider) = runtime(RuntimeConfig::default(), provider);

    let response = runtime.handle_trigger(Trigger::new("echo")).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);

    // the second request carries the error as a tool message
    let second = &provider.requests()[1];
    let tool_message = second
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("a"));
    assert!(tool_message.content.starts_with("Error [invalid_arguments]"));
}

#[tokio::test]
async fn retryable_provider_errors_are_retried() {
    let provider = ScriptedProvider::new()
        .then_fail(ProviderError::RateLimited {
            retry_after_ms: Some(2),
            message: "slow down".into(),
        })
        .then_fail(ProviderError::Api {
            status: 503,
            message: "overloaded".into(),
            code: None,
            retryable: true,
        })
        .then_respond(ModelResponse::text("finally"));
    let (runtime, provider) = runtime(RuntimeConfig::default(), provider);

    let response = runtime.handle_trigger(Trigger::new("hi")).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);
    assert_eq!(response.answer.as_deref(), Some("finally"));
    assert_eq!(provider.call_count(), 3);
}

#[tokio::test]
async fn fatal_provider_error_ends_session_with_explanation() {
    let provider = ScriptedProvider::new().then_fail(ProviderError::Auth {
        message: "invalid api key".into(),
    });
    let (runtime, provider) = runtime(RuntimeConfig::default(), provider);

    let response = runtime.handle_trigger(Trigger::new("hi")).await.unwrap();
    assert_eq!(response.status, SessionStatus::Failed);
    assert_eq!(provider.call_count(), 1);

    let transcript = runtime.transcript(&response.session_id).await.unwrap();
    let last = transcript.last().unwrap();
    assert_eq!(last.terminal_status(), Some(SessionStatus::Failed));
    assert!(last.content.contains("invalid api key"), "{}", last.content);
}

#[tokio::test]
async fn cancel_while_waiting_for_the_model() {
    let provider = ScriptedProvider::new().then_hang();
    let (runtime, _) = runtime(RuntimeConfig::default(), provider);

    let handle = runtime.spawn_trigger(Trigger::new("think hard")).await.unwrap();
    let session_id = handle.session_id().to_string();
    tokio::time::sleep(Duration::from_millis(20)).await;
    runtime.cancel(&session_id).await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, SessionStatus::Cancelled);

    let transcript = runtime.transcript(&session_id).await.unwrap();
    assert_eq!(
        transcript.last().and_then(|m| m.terminal_status()),
        Some(SessionStatus::Cancelled)
    );
}

#[tokio::test]
async fn cancelled_session_can_be_resumed() {
    let provider = ScriptedProvider::new()
        .then_hang()
        .then_respond(ModelResponse::text("back again"));
    let (runtime, _) = runtime(RuntimeConfig::default(), provider);

    let handle = runtime.spawn_trigger(Trigger::new("first")).await.unwrap();
    let session_id = handle.session_id().to_string();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    assert_eq!(handle.wait().await.unwrap().status, SessionStatus::Cancelled);

    let response = runtime
        .handle_trigger(Trigger::resume(&session_id, "second"))
        .await
        .unwrap();
    assert_eq!(response.status, SessionStatus::Completed);
    assert_gapless(&runtime.transcript(&session_id).await.unwrap());
}

#[tokio::test]
async fn concurrent_trigger_on_running_session_is_busy() {
    let provider = ScriptedProvider::new().then_hang();
    let (runtime, _) = runtime(RuntimeConfig::default(), provider);

    let handle = runtime.spawn_trigger(Trigger::new("first")).await.unwrap();
    let err = runtime
        .handle_trigger(Trigger::resume(handle.session_id(), "second"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SessionBusy(_)));
    handle.cancel();
}

#[tokio::test]
async fn long_runs_keep_the_system_prompt_and_stay_bounded() {
    let big = "x".repeat(400);
    let provider = ScriptedProvider::new();
    let provider = (0..12).fold(provider, |p, i| {
        p.then_respond(calls(vec![call(&format!("c{}", i), "echo", json!({"text": big.clone()}))]))
    });
    let provider = provider.then_respond(ModelResponse::text("done"));
    let config = RuntimeConfig::default()
        .with_max_context_tokens(600)
        .with_system_prompt("You are a test agent.");
    let (runtime, provider) = runtime(config, provider);

    let response = runtime.handle_trigger(Trigger::new("echo a lot")).await.unwrap();
    assert_eq!(response.status, SessionStatus::Completed);

    let window = WindowConfig::default().with_max_tokens(600);
    for request in provider.requests() {
        assert_eq!(request.messages[0].content, "You are a test agent.");
        let chars: usize = request
            .messages
            .iter()
            .map(|m| m.content.len() + window.message_overhead * window.chars_per_token)
            .sum();
        assert!(chars / window.chars_per_token <= 600, "request of ~{} tokens", chars / 4);
    }
    let last = provider.requests().pop().unwrap();
    assert!(last
        .messages
        .iter()
        .any(|m| m.content.starts_with("[Context summary")));

    // the transcript itself keeps everything
    let transcript = runtime.transcript(&response.session_id).await.unwrap();
    assert_gapless(&transcript);
    assert_eq!(transcript.iter().filter(|m| m.tool_result().is_some()).count(), 12);
}

fn scripted(plan: &[u8]) -> ScriptedProvider {
    let mut provider = ScriptedProvider::new();
    for (step, kind) in plan.iter().enumerate() {
        let response = match kind % 4 {
            0 => calls(vec![call(&format!("e{}", step), "echo", json!({"text": format!("step {}", step)}))]),
            1 => calls(vec![call(&format!("u{}", step), "missing", json!({}))]),
            2 => calls(vec![
                call(&format!("p{}a", step), "echo", json!({"text": "a"})),
                call(&format!("p{}b", step), "echo", json!({"bad": true})),
                call(&format!("p{}c", step), "echo", json!({"text": "c"})),
            ]),
            _ => ModelResponse::ToolCalls {
                text: Some(format!("thinking {}", step)),
                calls: vec![call(&format!("t{}", step), "echo", json!({"text": "t"}))],
            },
        };
        provider = provider.then_respond(response);
    }
    provider.then_respond(ModelResponse::text("final"))
}

fn shape(transcript: &[Message]) -> Vec<(u64, Role, String, bool)> {
    transcript
        .iter()
        .map(|m| {
            let is_result = matches!(m.payload, Some(Payload::ToolResult { .. }));
            (m.seq, m.role, m.content.clone(), is_result)
        })
        .collect()
}

fn run_plan(plan: &[u8]) -> Vec<Message> {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let config = RuntimeConfig::default().with_max_steps(plan.len() + 1);
        let (runtime, _) = runtime(config, scripted(plan));
        let response = runtime
            .handle_trigger(Trigger::new("go").with_metadata("source", "proptest"))
            .await
            .unwrap();
        assert_eq!(response.status, SessionStatus::Completed);
        runtime.transcript(&response.session_id).await.unwrap()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn transcripts_are_gapless_and_every_call_resolves(plan in prop::collection::vec(any::<u8>(), 0..8)) {
        let transcript = run_plan(&plan);
        assert_gapless(&transcript);
        assert_one_result_per_call(&transcript);
        prop_assert_eq!(
            transcript.last().and_then(|m| m.terminal_status()),
            Some(SessionStatus::Completed)
        );
    }

    #[test]
    fn same_script_gives_same_transcript(plan in prop::collection::vec(any::<u8>(), 0..6)) {
        let first = shape(&run_plan(&plan));
        let second = shape(&run_plan(&plan));
        prop_assert_eq!(first, second);
    }
}

#[tokio::test]
async fn trigger_metadata_is_kept() {
    let provider = ScriptedProvider::new().then_respond(ModelResponse::text("ok"));
    let (runtime, _) = runtime(RuntimeConfig::default(), provider);

    let mut metadata = HashMap::new();
    metadata.insert("channel".to_string(), json!("cron"));
    let trigger = Trigger {
        metadata,
        ..Trigger::new("nightly report")
    };
    let response = runtime.handle_trigger(trigger).await.unwrap();

    let session = runtime.session(&response.session_id).await.unwrap();
    let meta = session.metadata();
    assert_eq!(meta.get_custom("channel"), Some(&json!("cron")));
    assert_eq!(meta.task.as_deref(), Some("nightly report"));
    assert_eq!(meta.status, SessionStatus::Completed);
}
