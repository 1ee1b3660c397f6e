use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn runner knobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generation and loop-control parameters the Turn Runner applies to every
/// provider call and multi-turn loop, absent a per-call override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Sampling temperature passed to the provider. `None` lets the
    /// provider use its own default.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Cap on generated output tokens per provider call.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Strings that stop generation when produced by the model.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
    /// Maximum multi-turn loop iterations for a top-level session turn
    /// before it is aborted with `max_turns_exceeded`.
    #[serde(default = "d_50")]
    pub max_turns: u32,
    /// Maximum multi-turn loop iterations for a `subsession`-spawned child.
    #[serde(default = "d_100")]
    pub max_turns_subagent: u32,
    /// Whether extended thinking is requested from providers that support it.
    #[serde(default)]
    pub thinking_enabled: bool,
    /// Reasoning effort hint forwarded to providers that support it
    /// ("low", "medium", "high"); ignored by providers that don't.
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            stop_sequences: Vec::new(),
            max_turns: 50,
            max_turns_subagent: 100,
            thinking_enabled: false,
            reasoning_effort: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_50() -> u32 {
    50
}
fn d_100() -> u32 {
    100
}
