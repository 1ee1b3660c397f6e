use serde::Serialize;
use std::pin::Pin;

use crate::tool::{Message, StopReason, ToolCall};

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// The alphabet the Stream Processor's state machine consumes from a
/// provider adapter and re-emits to listeners.
///
/// State machine: `Idle -> Streaming -> (Text|Thinking|ToolCall)* -> Done`,
/// with `Failed(category)` reachable from any state and `Aborted` reachable
/// from `Streaming` (the accumulated buffer at the point of abort is
/// preserved, not discarded).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "start")]
    Start,

    #[serde(rename = "text_start")]
    TextStart,
    #[serde(rename = "text_delta")]
    TextDelta { delta: String },
    #[serde(rename = "text_end")]
    TextEnd { text: String },

    #[serde(rename = "thinking_start")]
    ThinkingStart,
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { delta: String },
    #[serde(rename = "thinking_end")]
    ThinkingEnd { thinking: String },

    /// A tool call finished assembling. Unlike text/thinking there is no
    /// incremental delta variant in the canonical alphabet — a provider
    /// adapter that streams partial arguments buffers them internally and
    /// emits this once per completed call.
    #[serde(rename = "toolcall_end")]
    ToolCallEnd { tool_call: ToolCall },

    /// The transport retried after a recoverable failure. `attempt` is
    /// 1-indexed; `delay_ms` is how long the retry backed off before firing.
    #[serde(rename = "retry")]
    Retry {
        attempt: u32,
        max: u32,
        delay_ms: u64,
        error: String,
    },

    /// Non-recoverable streaming failure. The Stream Processor transitions
    /// to `Failed` and does not emit `done` afterward.
    #[serde(rename = "error")]
    Error { err: String },

    /// Stream completed normally. `message` is the fully assembled
    /// assistant message; if the provider's own completion payload had no
    /// text, the processor synthesizes `message` from the buffered text
    /// deltas instead of emitting an empty one.
    #[serde(rename = "done")]
    Done {
        message: Message,
        stop_reason: StopReason,
    },
}

/// The Stream Processor's own state, independent of the specific event
/// being handled. Used to validate that transitions follow the alphabet
/// (e.g. a `text_delta` outside `Streaming`/`Text` is a protocol violation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    InText,
    InThinking,
    Done,
    Aborted,
    Failed,
}
