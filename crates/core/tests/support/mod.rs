//! Shared black-box fixtures for the end-to-end scenario tests: a scripted
//! provider that never makes a network call, plus a handful of reference
//! tools (echo/sleep/toy-exec) that exercise the executor contract without a
//! real filesystem or shell dependency, the same way the teacher's own test
//! suite never hits a live LLM or a real tool backend.
//!
//! Lives under `tests/support/` rather than `tests/support.rs` so cargo
//! doesn't also compile it as its own standalone test binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tron_core::{ExecutionContract, Tool, ToolExecutionContext, ToolOutcome};
use tron_domain::error::Result;
use tron_domain::session::ExtractedData;
use tron_domain::stream::{BoxStream, StreamEvent};
use tron_domain::tool::{AssistantMetadata, Message, StopReason, ToolCall, ToolCategory, ToolDefinition, Usage};
use tron_providers::{LlmProvider, StreamContext, StreamOptions};

/// Replays one scripted batch of stream events per call, in order, then
/// produces an empty stream once exhausted.
pub struct ScriptedProvider {
    pub batches: Mutex<Vec<Vec<Result<StreamEvent>>>>,
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }
    fn model(&self) -> &str {
        "scripted-model"
    }
    fn capabilities(&self) -> &tron_domain::capability::LlmCapabilities {
        static CAPS: std::sync::OnceLock<tron_domain::capability::LlmCapabilities> = std::sync::OnceLock::new();
        CAPS.get_or_init(Default::default)
    }
    async fn stream(&self, _context: StreamContext, _options: StreamOptions) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let mut batches = self.batches.lock();
        let next = if batches.is_empty() { Vec::new() } else { batches.remove(0) };
        Ok(Box::pin(futures_util::stream::iter(next)))
    }
}

/// A single `Done` event carrying `text` as the assistant's final message.
pub fn done_with_text(text: &str) -> Vec<Result<StreamEvent>> {
    let mut message = Message::assistant(text);
    message.metadata = Some(AssistantMetadata {
        provider_id: "scripted".into(),
        model_id: "scripted-model".into(),
        usage: Usage { input_tokens: 100, output_tokens: 2, ..Usage::default() },
        stop_reason: StopReason::EndTurn,
    });
    vec![Ok(StreamEvent::Done { message, stop_reason: StopReason::EndTurn })]
}

/// A single `ToolCallEnd` followed by a `Done { stop_reason: ToolUse }` with
/// empty text — the batch shape that makes the Turn Runner dispatch to the
/// executor and loop back for another provider call.
pub fn tool_call_then_done(call_id: &str, tool_name: &str, arguments: serde_json::Value) -> Vec<Result<StreamEvent>> {
    let tool_call = ToolCall { call_id: call_id.into(), tool_name: tool_name.into(), arguments };
    let message = Message { role: tron_domain::tool::Role::Assistant, content: tron_domain::tool::MessageContent::Text(String::new()), metadata: None };
    vec![
        Ok(StreamEvent::ToolCallEnd { tool_call }),
        Ok(StreamEvent::Done { message, stop_reason: StopReason::ToolUse }),
    ]
}

/// Always produces the same canned narrative, regardless of what's actually
/// in history — good enough to exercise the compaction pipeline's plumbing
/// without depending on a real model's summarization quality.
pub struct StubSummarizer;

#[async_trait]
impl tron_core::Summarizer for StubSummarizer {
    async fn summarize(&self, _messages: &[Message], _model: &str, _working_directory: &str) -> Result<tron_core::SummarizeOutput> {
        Ok(tron_core::SummarizeOutput {
            extracted_data: ExtractedData::default(),
            narrative: "the user asked about deployment, then debugging a flaky test".into(),
        })
    }
}

fn reference_tool_definition(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        parameters: serde_json::json!({"type": "object"}),
        category: ToolCategory::General,
        requires_confirmation: false,
    }
}

/// Echoes its arguments back as the tool result. Exercises the plain
/// contextual contract path with no side effects.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        reference_tool_definition("echo", "Echoes the given arguments back as text.")
    }
    async fn execute(&self, arguments: serde_json::Value, _ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
        Ok(ToolOutcome::ok(arguments.to_string()))
    }
}

/// Sleeps for `ms` (capped at 50ms so a misconfigured scenario can't stall
/// the suite) and reports one progress update partway through. Exercises
/// the `options` contract's live `report_progress` path.
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn definition(&self) -> ToolDefinition {
        reference_tool_definition("sleep", "Sleeps briefly, reporting progress partway through.")
    }
    fn execution_contract(&self) -> ExecutionContract {
        ExecutionContract::Options
    }
    async fn execute(&self, arguments: serde_json::Value, ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
        let ms = arguments.get("ms").and_then(|v| v.as_u64()).unwrap_or(5).min(50);
        tokio::time::sleep(Duration::from_millis(ms / 2)).await;
        ctx.report_progress("halfway");
        tokio::time::sleep(Duration::from_millis(ms / 2)).await;
        Ok(ToolOutcome::ok(format!("slept {ms}ms")))
    }
}

/// Pretends to run `command` without ever touching a real shell — returns a
/// canned transcript so executor-contract scenarios (error mapping, hook
/// interception, policy filtering) can be exercised against something that
/// looks like a shell-exec tool without the nondeterminism of one.
pub struct ToyExecTool;

#[async_trait]
impl Tool for ToyExecTool {
    fn definition(&self) -> ToolDefinition {
        reference_tool_definition("toy_exec", "Simulates running a shell command and returns a canned transcript.")
    }
    async fn execute(&self, arguments: serde_json::Value, _ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
        let command = arguments.get("command").and_then(|v| v.as_str()).unwrap_or_default();
        if command.is_empty() {
            return Ok(ToolOutcome::error("command is required"));
        }
        Ok(ToolOutcome::ok(format!("$ {command}\n(toy-exec: nothing was actually run)")))
    }
}
