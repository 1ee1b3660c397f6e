use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::{Message, ToolCall};

/// A single record in a session's durable, append-only event log.
///
/// Events form a chain via `parent_id`: each event's `parent_id` is the id
/// of the event that was the session's head at the moment it was appended.
/// `sequence` is gapless and strictly increasing per session, assigned by
/// the linearized append path — never chosen by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: String,
    pub workspace_id: String,
    /// Nullable only for a session's root event (including a fork's
    /// synthetic root, whose `parent_id` is the `fork_from_event_id` in the
    /// *parent* session's chain, not its own).
    pub parent_id: Option<Uuid>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Type-specific event payloads. Variant names double as the wire `type`
/// tag referenced by the Turn Runner's state machine and the C1 Event
/// Emitter's listener dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    MessageUser { message: Message },
    MessageAssistant { message: Message },
    /// Logical deletion: `target_event_id` is tombstoned, never removed.
    MessageDeleted { target_event_id: Uuid },
    ToolCallEvent { call: ToolCall },
    ToolResult { tool_use_id: String, content: String, is_error: bool },
    TurnStart { turn_id: Uuid },
    TurnEnd { turn_id: Uuid, cost: f64 },
    /// Emitted after the assistant message is finalized but before any
    /// tool call in it executes, so downstream cost accounting never
    /// attributes usage to the wrong turn boundary.
    ResponseComplete { usage_input_tokens: u32, usage_output_tokens: u32 },
    ConfigModelSwitch { model: String },
    TodoWrite { items: Vec<String> },
    MemoryLedger { note: String },
    /// Synthetic root of a forked session's own chain; `parent_id` on the
    /// containing `Event` is the `fork_from_event_id`.
    SessionForked { forked_from_session_id: String },
    AgentTurnFailed { category: FailureCategory, message: String, retryable: bool },
}

/// Recovery/propagation category attached to `turn_failed` /
/// `agent.turn_failed` events. Kept distinct from `crate::error::Error` —
/// this must be a serializable event payload, not just a Rust error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    TokenLimit,
    ProviderTransport,
    ProviderRateLimit,
    ProviderAuth,
    ToolNotFound,
    ToolExecution,
    ToolBlocked,
    Abort,
    SummarizerFailure,
    LogAppend,
}

impl From<crate::error::ErrorCategory> for FailureCategory {
    fn from(c: crate::error::ErrorCategory) -> Self {
        use crate::error::ErrorCategory as E;
        match c {
            E::TokenLimit => FailureCategory::TokenLimit,
            E::ProviderTransport => FailureCategory::ProviderTransport,
            E::ProviderRateLimit => FailureCategory::ProviderRateLimit,
            E::ProviderAuth => FailureCategory::ProviderAuth,
            E::ToolNotFound => FailureCategory::ToolNotFound,
            E::ToolExecution => FailureCategory::ToolExecution,
            E::ToolBlocked => FailureCategory::ToolBlocked,
            E::Abort => FailureCategory::Abort,
            E::SummarizerFailure => FailureCategory::SummarizerFailure,
            E::LogAppend => FailureCategory::LogAppend,
            E::Other => FailureCategory::ProviderTransport,
        }
    }
}

/// Why a compaction pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionReason {
    PreTurnGuardrail,
    ThresholdExceeded,
    Manual,
    ModelSwitch,
}
