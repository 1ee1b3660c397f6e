use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::Message;

/// A session's durable record: identity, model binding, and the denormalized
/// counters callers read without walking the event log. The log itself
/// remains authoritative — these counters are a cache over it, refreshed as
/// events are appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub workspace_id: String,
    /// Most recently appended event; the chain head new appends attach to.
    pub head_event_id: Option<uuid::Uuid>,
    /// The very first event in this session's own chain (for a fork, this
    /// is the synthetic `session.forked` event, not an event it shares with
    /// its parent).
    pub root_event_id: Option<uuid::Uuid>,
    pub title: Option<String>,
    pub latest_model: String,
    pub working_directory: Option<String>,
    /// Set when this session was spawned by another session.
    pub parent_session_id: Option<String>,
    /// Set only for `spawn_type = fork`: the event in the parent chain this
    /// session's root event was forked from.
    pub fork_from_event_id: Option<uuid::Uuid>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
    pub counters: SessionCounters,
    pub tags: Vec<String>,
    /// Set on a child session to the id of the session that spawned it;
    /// mirrors `parent_session_id` but kept distinct since a fork's
    /// `parent_session_id` and `spawning_session_id` can diverge once the
    /// parent session itself is later archived.
    pub spawning_session_id: Option<String>,
    pub spawn_type: Option<SpawnType>,
    pub spawn_task: Option<String>,
    /// `true` while a turn is actively being processed — the linearization
    /// lock a new turn must wait on before it can append.
    pub processing: bool,
}

/// Denormalized usage/cost counters, refreshed on every `turn_end`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionCounters {
    pub event_count: u64,
    pub message_count: u64,
    pub turn_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_tokens: u64,
    pub cost: f64,
    pub last_turn_input_tokens: u64,
}

/// How a child session came into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnType {
    /// In-process, trackable, optionally blocking parent-await.
    Subsession,
    /// Detached terminal multiplexer session; always fire-and-forget.
    Tmux,
    /// Branched from a specific event in another session's chain.
    Fork,
}

impl Session {
    pub fn new(id: impl Into<String>, workspace_id: impl Into<String>, latest_model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            head_event_id: None,
            root_event_id: None,
            title: None,
            latest_model: latest_model.into(),
            working_directory: None,
            parent_session_id: None,
            fork_from_event_id: None,
            created_at: now,
            last_activity_at: now,
            archived_at: None,
            counters: SessionCounters::default(),
            tags: Vec::new(),
            spawning_session_id: None,
            spawn_type: None,
            spawn_task: None,
            processing: false,
        }
    }

    /// Whether a new `message.user` or turn may be appended. False once the
    /// session is archived; callers must not linearize an append past this.
    pub fn can_proceed(&self) -> bool {
        self.archived_at.is_none()
    }

    /// Whether this session has gone quiet for at least `threshold` since its
    /// last recorded activity — used by a host deciding whether a session is
    /// eligible for resume bookkeeping (eviction from a warm cache, a
    /// "still there?" prompt) rather than still mid-conversation.
    pub fn is_idle(&self, threshold: chrono::Duration) -> bool {
        Utc::now() - self.last_activity_at >= threshold
    }
}

/// A point-in-time read of a session's context window usage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Authoritative count from the provider's last response, when known;
    /// falls back to the sum of component estimates before the first
    /// response or after a model switch resets the baseline.
    pub current_tokens: u32,
    pub context_limit: u32,
    pub usage_percent: f64,
    pub threshold_level: ContextBand,
    pub breakdown: ContextBreakdown,
}

/// Component estimate of where the context budget is being spent, used for
/// reporting even when `current_tokens` is the authoritative API count.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContextBreakdown {
    pub system_prompt: u32,
    pub tools: u32,
    pub rules: u32,
    pub messages: u32,
}

impl ContextSnapshot {
    pub fn new(current_tokens: u32, context_limit: u32, breakdown: ContextBreakdown, thresholds: &crate::config::ThresholdConfig) -> Self {
        let usage_percent = if context_limit == 0 {
            1.0
        } else {
            current_tokens as f64 / context_limit as f64
        };
        let threshold_level = ContextBand::from_name(thresholds.band(usage_percent));
        Self {
            current_tokens,
            context_limit,
            usage_percent,
            threshold_level,
            breakdown,
        }
    }
}

/// The threshold band a session's context usage currently falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBand {
    Normal,
    Warning,
    Alert,
    Critical,
    Exceeded,
}

impl ContextBand {
    pub fn from_name(name: &str) -> Self {
        match name {
            "warning" => ContextBand::Warning,
            "alert" => ContextBand::Alert,
            "critical" => ContextBand::Critical,
            "exceeded" => ContextBand::Exceeded,
            _ => ContextBand::Normal,
        }
    }
}

/// Structured facts the Compaction Handler extracts from the summarized
/// history, alongside the free-form narrative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedData {
    #[serde(default)]
    pub current_goal: Option<String>,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub pending_tasks: Vec<String>,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub topics_discussed: Vec<String>,
    #[serde(default)]
    pub user_preferences: Vec<String>,
    #[serde(default)]
    pub important_context: Vec<String>,
}

/// The outcome of a single compaction pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionResult {
    pub success: bool,
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub compression_ratio: f64,
    pub summary: String,
    pub extracted_data: ExtractedData,
    pub preserved_turns: usize,
    pub summarized_turns: usize,
}

/// A restorable point-in-time view of a session, used to export/restore at
/// any event id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub model: String,
    pub provider_id: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools_manifest: Vec<crate::tool::ToolDefinition>,
}
