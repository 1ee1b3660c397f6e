use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses old conversation history into a summary so the
/// context window doesn't overflow across a long-running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Enable automatic compaction when usage crosses `threshold`.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Fraction of the model's context window (0.0-1.0) that triggers
    /// automatic compaction once crossed.
    #[serde(default = "d_threshold")]
    pub threshold: f64,
    /// Number of most recent turns kept verbatim (never summarized).
    /// A "turn" is a user message plus everything that follows up to the
    /// next user message, so the preserved window is `preserve_recent_turns * 2`
    /// messages counted back from the end of history.
    #[serde(default = "d_5")]
    pub preserve_recent_turns: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            threshold: 0.70,
            preserve_recent_turns: 5,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_threshold() -> f64 {
    0.70
}
fn d_5() -> usize {
    5
}
