//! Consumes a provider's stream alphabet and materializes a finalized
//! assistant message plus any tool calls it requested.
//!
//! Grounded on the accumulation/dispatch shape of the teacher's turn loop,
//! generalized into a standalone state machine that owns no provider or
//! transport concerns of its own.

use futures_util::StreamExt;

use tron_domain::stream::{BoxStream, StreamEvent, StreamState};
use tron_domain::tool::{ContentPart, Message, MessageContent, StopReason, ToolCall};

use crate::cancel::CancelToken;

#[derive(Debug, thiserror::Error)]
pub enum StreamProcessorError {
    #[error("stream aborted")]
    Aborted { partial_text: String, partial_thinking: Option<String> },
    #[error("stream ended without a done event")]
    NoResponseReceived,
    #[error("provider stream error: {0}")]
    Provider(String),
}

/// Result of draining a provider stream to completion.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
    pub accumulated_text: String,
    pub accumulated_thinking: Option<String>,
    pub stop_reason: StopReason,
}

/// Callbacks invoked as deltas accumulate; used by the Turn Runner to
/// re-publish progress on the event bus without this module depending on it.
pub trait StreamObserver: Send {
    fn on_text_delta(&mut self, _delta: &str) {}
    fn on_thinking_delta(&mut self, _delta: &str) {}
    fn on_tool_call_end(&mut self, _tool_call: &ToolCall) {}
    fn on_retry(&mut self, _attempt: u32, _max: u32, _delay_ms: u64, _error: &str) {}
}

/// No-op observer for callers that don't need progress callbacks.
pub struct NullObserver;
impl StreamObserver for NullObserver {}

/// Drains `stream`, applying the stream-alphabet rules, until `Done`,
/// exhaustion, an `Error` event, or cancellation via `cancel`.
pub async fn process_stream(
    mut stream: BoxStream<'static, tron_domain::error::Result<StreamEvent>>,
    cancel: &CancelToken,
    observer: &mut dyn StreamObserver,
) -> Result<TurnOutcome, StreamProcessorError> {
    let mut state = StreamState::Idle;
    let mut text_buf = String::new();
    let mut thinking_buf = String::new();
    let mut thinking_seen = false;
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut done: Option<(Message, StopReason)> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(StreamProcessorError::Aborted {
                partial_text: text_buf,
                partial_thinking: thinking_seen.then_some(thinking_buf),
            });
        }

        let next = stream.next().await;
        let event = match next {
            None => break,
            Some(Err(e)) => return Err(StreamProcessorError::Provider(e.to_string())),
            Some(Ok(ev)) => ev,
        };

        match event {
            StreamEvent::Start => state = StreamState::Streaming,
            StreamEvent::TextStart => state = StreamState::InText,
            StreamEvent::TextDelta { delta } => {
                text_buf.push_str(&delta);
                observer.on_text_delta(&delta);
            }
            StreamEvent::TextEnd { text } => {
                if text.len() > text_buf.len() {
                    text_buf = text;
                }
                state = StreamState::Streaming;
            }
            StreamEvent::ThinkingStart => {
                state = StreamState::InThinking;
                thinking_seen = true;
            }
            StreamEvent::ThinkingDelta { delta } => {
                thinking_seen = true;
                thinking_buf.push_str(&delta);
                observer.on_thinking_delta(&delta);
            }
            StreamEvent::ThinkingEnd { thinking } => {
                thinking_seen = true;
                if thinking.len() > thinking_buf.len() {
                    thinking_buf = thinking;
                }
                state = StreamState::Streaming;
            }
            StreamEvent::ToolCallEnd { tool_call } => {
                observer.on_tool_call_end(&tool_call);
                tool_calls.push(tool_call);
            }
            StreamEvent::Retry { attempt, max, delay_ms, error } => {
                observer.on_retry(attempt, max, delay_ms, &error);
            }
            StreamEvent::Error { err } => {
                return Err(StreamProcessorError::Provider(err));
            }
            StreamEvent::Done { message, stop_reason } => {
                state = StreamState::Done;
                done = Some((message, stop_reason));
                break;
            }
        }
    }

    let (mut message, stop_reason) = done.ok_or(StreamProcessorError::NoResponseReceived)?;

    // If the final message carries no text but we accumulated some via
    // deltas, synthesize a single-text-block message from the buffer.
    if message_is_text_empty(&message) && !text_buf.is_empty() {
        message.content = MessageContent::Parts(vec![ContentPart::Text { text: text_buf.clone() }]);
    }

    // Dedupe tool calls that appear both via `ToolCallEnd` and embedded in
    // the final message, keyed by call id.
    let message_tool_ids: std::collections::HashSet<String> = match &message.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => std::collections::HashSet::new(),
    };
    tool_calls.retain(|tc| !message_tool_ids.contains(&tc.call_id));

    debug_assert!(matches!(state, StreamState::Done));

    Ok(TurnOutcome {
        message,
        tool_calls,
        accumulated_text: text_buf,
        // Thinking that ended empty is reported as absent, not "".
        accumulated_thinking: (thinking_seen && !thinking_buf.is_empty()).then_some(thinking_buf),
        stop_reason,
    })
}

fn message_is_text_empty(message: &Message) -> bool {
    match &message.content {
        MessageContent::Text(t) => t.is_empty(),
        MessageContent::Parts(parts) => parts.iter().all(|p| match p {
            ContentPart::Text { text } => text.is_empty(),
            _ => false,
        }) || parts.is_empty(),
    }
}
