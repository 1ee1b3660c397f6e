use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caps and thresholds the Context Manager uses to keep a session's
/// message history within its model's context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Smallest a single tool result is ever truncated down to, regardless
    /// of how little budget remains.
    #[serde(default = "d_1000")]
    pub truncation_floor_chars: usize,
    /// Largest a tool result is allowed to be when the session is well
    /// under budget (below the warning threshold).
    #[serde(default = "d_100000")]
    pub truncation_ceiling_chars: usize,
    /// Usage-fraction thresholds dividing the context window into bands.
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            truncation_floor_chars: 1_000,
            truncation_ceiling_chars: 100_000,
            thresholds: ThresholdConfig::default(),
        }
    }
}

/// Fractional boundaries (usage / context_limit) separating the bands a
/// session's context usage is reported in: normal, warning, alert,
/// critical, exceeded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "d_warning")]
    pub warning: f64,
    #[serde(default = "d_alert")]
    pub alert: f64,
    #[serde(default = "d_critical")]
    pub critical: f64,
    #[serde(default = "d_exceeded")]
    pub exceeded: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            warning: 0.50,
            alert: 0.70,
            critical: 0.85,
            exceeded: 0.95,
        }
    }
}

impl ThresholdConfig {
    /// Classify a usage fraction (usage_tokens / context_limit) into a band name.
    pub fn band(&self, fraction: f64) -> &'static str {
        if fraction >= self.exceeded {
            "exceeded"
        } else if fraction >= self.critical {
            "critical"
        } else if fraction >= self.alert {
            "alert"
        } else if fraction >= self.warning {
            "warning"
        } else {
            "normal"
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_1000() -> usize {
    1_000
}
fn d_100000() -> usize {
    100_000
}
fn d_warning() -> f64 {
    0.50
}
fn d_alert() -> f64 {
    0.70
}
fn d_critical() -> f64 {
    0.85
}
fn d_exceeded() -> f64 {
    0.95
}
