//! Turn Runner: the per-turn orchestrator tying the Stream Processor, Tool
//! Executor, and Context Manager together into one pass of the agent loop.
//!
//! Grounded on the teacher's `gateway/src/runtime/turn.rs` tool loop
//! (`run_turn_inner`'s streaming-then-dispatch shape and its `MAX_TOOL_LOOPS`
//! guard), generalized from a push-to-channel `TurnEvent` stream to the
//! synchronous [`EventEmitter`] bus and from the teacher's ad hoc message
//! accumulation to the already-finalized [`process_stream`] state machine.

use std::sync::Arc;

use chrono::Utc;

use tron_domain::config::ModelPricing;
use tron_domain::event::{CompactionReason, EventPayload, FailureCategory};
use tron_domain::tool::{Message, StopReason, Usage};
use tron_providers::{LlmProvider, StreamContext, StreamOptions};

use crate::cancel::CancelToken;
use crate::compaction::compact;
use crate::context::ContextManager;
use crate::event_emitter::{CoreEvent, EventEmitter};
use crate::session::{ActiveSession, SessionController};
use crate::stream_processor::{process_stream, NullObserver, StreamProcessorError};
use crate::tools::ToolExecutor;
use crate::Summarizer;

/// Hard ceiling on tool-call iterations within a single turn, matching the
/// teacher's own guard against a model that never stops calling tools.
const MAX_TOOL_LOOPS: usize = 25;

/// What one call to [`TurnRunner::run_turn`] returns.
#[derive(Debug, Clone, Default)]
pub struct TurnResult {
    pub success: bool,
    pub message: Option<Message>,
    pub tool_calls_executed: usize,
    pub token_usage: Option<Usage>,
    pub stop_reason: Option<StopReason>,
    pub stop_turn_requested: bool,
    pub interrupted: bool,
    pub partial_content: Option<String>,
    pub error: Option<String>,
}

pub struct TurnRunner {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<ToolExecutor>,
    emitter: Arc<EventEmitter>,
    sessions: Arc<SessionController>,
    summarizer: Option<Arc<dyn Summarizer>>,
    pricing: std::collections::HashMap<String, ModelPricing>,
}

impl TurnRunner {
    pub fn new(provider: Arc<dyn LlmProvider>, executor: Arc<ToolExecutor>, emitter: Arc<EventEmitter>, sessions: Arc<SessionController>) -> Self {
        Self {
            provider,
            executor,
            emitter,
            sessions,
            summarizer: None,
            pricing: std::collections::HashMap::new(),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_pricing(mut self, pricing: std::collections::HashMap<String, ModelPricing>) -> Self {
        self.pricing = pricing;
        self
    }

    fn estimate_cost(&self, model: &str, usage: &Usage) -> f64 {
        self.pricing
            .get(model)
            .map(|p| p.estimate_cost(usage.input_tokens, usage.output_tokens))
            .unwrap_or(0.0)
    }

    async fn attempt_compaction(&self, active: &ActiveSession, working_directory: &str, reason: CompactionReason) -> tron_domain::error::Result<()> {
        let summarizer = self
            .summarizer
            .as_ref()
            .ok_or_else(|| tron_domain::error::Error::Summarizer("no summarizer configured".into()))?;

        let session_id = active.id();
        self.emitter.emit(CoreEvent::CompactionStart {
            session_id: session_id.clone(),
            timestamp: Utc::now(),
            reason: format!("{reason:?}"),
        });

        let (messages, model, preserve_recent_turns) = active
            .with_context(|ctx| (ctx.get_messages(), ctx.get_model().to_string(), ctx.preserve_recent_turns()))
            .await;

        let (new_history, result) = compact(&messages, summarizer.as_ref(), &model, working_directory, preserve_recent_turns, None, reason).await?;

        active.with_context(|ctx| ctx.set_messages(new_history)).await;

        self.emitter.emit(CoreEvent::CompactionComplete {
            session_id,
            timestamp: Utc::now(),
            result,
        });
        Ok(())
    }

    /// Run exactly one turn: pre-flight guardrail, one or more model calls
    /// interleaved with tool dispatch, and the closing `turn_end` emission.
    /// Does not loop across turns — that's the caller's job, driven by
    /// `stop_reason`/`stop_turn_requested`/`interrupted` on the result.
    pub async fn run_turn(
        &self,
        active: &ActiveSession,
        cancel: &CancelToken,
        turn_number: u32,
        working_directory: &str,
        estimated_response_tokens: u32,
    ) -> TurnResult {
        let session_id = active.id();
        let workspace_id = active.snapshot().workspace_id;
        let turn_started = std::time::Instant::now();
        let turn_id = uuid::Uuid::new_v4();

        // ── Step 2: pre-turn guardrail ──────────────────────────────────
        let admission = active
            .with_context(|ctx| ctx.validate_pre_turn(estimated_response_tokens, self.summarizer.is_some()))
            .await;

        if !admission.can_proceed {
            if admission.needs_compaction {
                if let Err(e) = self.attempt_compaction(active, working_directory, CompactionReason::PreTurnGuardrail).await {
                    return self.fail_turn(&session_id, FailureCategory::TokenLimit, e.to_string(), false).await;
                }
            } else {
                let message = admission.error.unwrap_or_else(|| "context limit exceeded".into());
                return self.fail_turn(&session_id, FailureCategory::TokenLimit, message, false).await;
            }
        }

        // ── Step 3: turn_start ───────────────────────────────────────────
        self.emitter.emit(CoreEvent::TurnStart { session_id: session_id.clone(), timestamp: Utc::now(), turn: turn_number });
        let _ = self.sessions.append(&session_id, &workspace_id, EventPayload::TurnStart { turn_id }).await;

        let mut total_usage = Usage::default();
        let mut tool_calls_executed = 0usize;
        let mut stop_turn_requested = false;
        let mut final_message: Option<Message> = None;
        let mut final_stop_reason = StopReason::EndTurn;

        for _ in 0..MAX_TOOL_LOOPS {
            if cancel.is_cancelled() {
                return self.finish_interrupted(active, &session_id, turn_started, total_usage, tool_calls_executed).await;
            }

            // ── Step 4: build context snapshot ──────────────────────────
            let (messages, system_prompt, tools_manifest, model) = active
                .with_context(|ctx| (ctx.get_messages(), ctx.get_system_prompt().to_string(), ctx.get_tools_manifest(), ctx.get_model().to_string()))
                .await;

            let stream_context = StreamContext { system_prompt, messages, tools: tools_manifest };
            let stream_options = StreamOptions::default();

            let stream = match self.provider.stream(stream_context, stream_options).await {
                Ok(s) => s,
                Err(e) => return self.fail_turn(&session_id, FailureCategory::ProviderTransport, e.to_string(), true).await,
            };

            let outcome = match process_stream(stream, cancel, &mut NullObserver).await {
                Ok(o) => o,
                Err(StreamProcessorError::Aborted { partial_text, .. }) => {
                    let mut result = self.finish_interrupted(active, &session_id, turn_started, total_usage, tool_calls_executed).await;
                    result.partial_content = Some(partial_text);
                    return result;
                }
                Err(e) => return self.fail_turn(&session_id, FailureCategory::ProviderTransport, e.to_string(), true).await,
            };

            // ── Step 6: response_complete before any tool runs ──────────
            let usage = outcome.message.metadata.as_ref().map(|m| m.usage).unwrap_or_default();
            total_usage.input_tokens += usage.input_tokens;
            total_usage.output_tokens += usage.output_tokens;
            total_usage.cache_read_tokens += usage.cache_read_tokens;
            total_usage.cache_creation_tokens += usage.cache_creation_tokens;
            total_usage.total_tokens += usage.total_tokens;

            self.emitter.emit(CoreEvent::ResponseComplete {
                session_id: session_id.clone(),
                timestamp: Utc::now(),
                has_tool_calls: !outcome.tool_calls.is_empty(),
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            });
            let _ = self
                .sessions
                .append(
                    &session_id,
                    &workspace_id,
                    EventPayload::ResponseComplete { usage_input_tokens: usage.input_tokens, usage_output_tokens: usage.output_tokens },
                )
                .await;

            // ── Step 7: append the assistant message ────────────────────
            if let Err(e) = self.sessions.append_assistant_message(&session_id, &workspace_id, outcome.message.clone()).await {
                return self.fail_turn(&session_id, FailureCategory::LogAppend, e.to_string(), false).await;
            }
            self.emitter.emit(CoreEvent::MessageAppended { session_id: session_id.clone(), timestamp: Utc::now(), message: outcome.message.clone() });

            final_message = Some(outcome.message);
            final_stop_reason = outcome.stop_reason;

            if outcome.tool_calls.is_empty() {
                break;
            }

            // ── Step 8: tool_use_batch then per-call dispatch ───────────
            self.emitter.emit(CoreEvent::ToolUseBatch { session_id: session_id.clone(), timestamp: Utc::now(), tool_calls: outcome.tool_calls.clone() });

            let mut interrupted_mid_tools = false;
            for tool_call in &outcome.tool_calls {
                if cancel.is_cancelled() {
                    interrupted_mid_tools = true;
                    break;
                }

                let _ = self.sessions.append_tool_call(&session_id, &workspace_id, tool_call.clone()).await;

                let tool_response = {
                    let ctx = active.lock_context().await;
                    self.executor.execute(tool_call, &session_id, cancel, &ctx, &self.emitter).await
                };

                if let Err(e) = self
                    .sessions
                    .append_tool_result(&session_id, &workspace_id, tool_call.call_id.clone(), tool_response.content.clone(), tool_response.is_error)
                    .await
                {
                    return self.fail_turn(&session_id, FailureCategory::LogAppend, e.to_string(), false).await;
                }
                let mut tool_result_message = Message::tool_result(tool_call.call_id.clone(), tool_response.content.clone());
                if tool_response.is_error {
                    if let tron_domain::tool::MessageContent::Parts(parts) = &mut tool_result_message.content {
                        if let Some(tron_domain::tool::ContentPart::ToolResult { is_error, .. }) = parts.first_mut() {
                            *is_error = true;
                        }
                    }
                }
                self.emitter.emit(CoreEvent::MessageAppended { session_id: session_id.clone(), timestamp: Utc::now(), message: tool_result_message });

                tool_calls_executed += 1;

                if tool_response.stop_turn {
                    stop_turn_requested = true;
                }

                if cancel.is_cancelled() {
                    interrupted_mid_tools = true;
                    break;
                }
            }

            if interrupted_mid_tools {
                return self.finish_interrupted(active, &session_id, turn_started, total_usage, tool_calls_executed).await;
            }

            if stop_turn_requested {
                break;
            }
        }

        // ── Step 9: turn_end ─────────────────────────────────────────────
        let duration_ms = turn_started.elapsed().as_millis() as u64;
        let (model, context_limit) = active.with_context(|ctx| (ctx.get_model().to_string(), ctx.get_context_limit())).await;
        let cost = self.estimate_cost(&model, &total_usage);
        self.emitter.emit(CoreEvent::TurnEnd {
            session_id: session_id.clone(),
            timestamp: Utc::now(),
            duration_ms,
            cost,
            token_usage: total_usage.clone(),
            context_limit,
        });
        let _ = self.sessions.append(&session_id, &workspace_id, EventPayload::TurnEnd { turn_id, cost }).await;

        TurnResult {
            success: true,
            message: final_message,
            tool_calls_executed,
            token_usage: Some(total_usage),
            stop_reason: Some(final_stop_reason),
            stop_turn_requested,
            interrupted: false,
            partial_content: None,
            error: None,
        }
    }

    async fn fail_turn(&self, session_id: &str, category: FailureCategory, message: String, recoverable: bool) -> TurnResult {
        self.emitter.emit(CoreEvent::AgentTurnFailed {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            category,
            message: message.clone(),
            recoverable,
        });
        TurnResult { success: false, error: Some(message), ..Default::default() }
    }

    async fn finish_interrupted(&self, active: &ActiveSession, session_id: &str, turn_started: std::time::Instant, usage: Usage, tool_calls_executed: usize) -> TurnResult {
        let duration_ms = turn_started.elapsed().as_millis() as u64;
        let context_limit = active.with_context(|ctx| ctx.get_context_limit()).await;
        self.emitter.emit(CoreEvent::AgentInterrupted { session_id: session_id.to_string(), timestamp: Utc::now(), partial_content: String::new() });
        self.emitter.emit(CoreEvent::TurnEnd {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            duration_ms,
            cost: 0.0,
            token_usage: usage,
            context_limit,
        });
        TurnResult {
            success: false,
            tool_calls_executed,
            token_usage: Some(usage),
            interrupted: true,
            ..Default::default()
        }
    }
}

/// Outer multi-turn loop: keeps calling [`TurnRunner::run_turn`] until the
/// model stops on its own, a tool requests `stop_turn`, the run is
/// interrupted, `max_turns` is hit, or a non-recoverable error occurs.
pub async fn run_until_done(
    runner: &TurnRunner,
    active: &ActiveSession,
    cancel: &CancelToken,
    working_directory: &str,
    estimated_response_tokens: u32,
    max_turns: u32,
) -> Vec<TurnResult> {
    active.set_processing(true);
    let mut results = Vec::new();
    for turn_number in 1..=max_turns {
        let result = runner.run_turn(active, cancel, turn_number, working_directory, estimated_response_tokens).await;
        let done = !result.success
            || result.interrupted
            || result.stop_turn_requested
            || matches!(result.stop_reason, Some(StopReason::EndTurn)) && result.tool_calls_executed == 0;
        results.push(result);
        if done {
            break;
        }
    }
    active.set_processing(false);
    results
}
