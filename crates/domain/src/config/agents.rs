use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sub-agent definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for a named sub-agent a session can spawn.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfig {
    /// Tool allow/deny policy applied to this agent's children.
    #[serde(default)]
    pub tool_policy: ToolPolicy,
    /// Role->model mapping (e.g. `{ executor = "vllm/qwen2.5" }`).
    /// Overrides the global `[llm.roles]` for sessions spawned under this agent.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Fan-out / recursion limits.
    #[serde(default)]
    pub limits: AgentLimits,
}

/// Hard ceilings on multi-agent fan-out to prevent runaway trees, plus the
/// timeouts a blocking `subsession` spawn is bound by.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Maximum nesting depth (parent -> child -> grandchild).
    /// A top-level spawn is depth=1; a child spawning its own child is depth=2.
    #[serde(default = "d_3")]
    pub max_depth: u32,
    /// Maximum number of spawn calls within a single parent turn.
    #[serde(default = "d_5")]
    pub max_children_per_turn: u32,
    /// Default wall-clock budget a `blocking: true` subsession spawn awaits
    /// before the tool call returns control to the parent with a
    /// "still running" result. The child keeps running past this point.
    #[serde(default = "d_1800000")]
    pub blocking_timeout_ms: u64,
    /// Hard ceiling on how long any spawned subsession may run before it is
    /// forcibly cancelled, independent of whether the parent is blocking on it.
    #[serde(default = "d_3600000")]
    pub hard_timeout_ms: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_children_per_turn: 5,
            blocking_timeout_ms: 1_800_000,
            hard_timeout_ms: 3_600_000,
        }
    }
}

/// Tool allow/deny policy — prefix-based matching.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tool name prefixes this agent may use. `["*"]` or empty = unrestricted.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool name prefixes this agent is denied (evaluated before allow).
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// Check whether the given tool name is permitted by this policy.
    ///
    /// Matching is **case-insensitive** — tool names are normalized to
    /// lowercase before comparison. Deny always wins over allow.
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();

        for d in &self.deny {
            let d_lower = d.to_ascii_lowercase();
            if d_lower == "*" || name == d_lower || name.starts_with(&format!("{d_lower}.")) {
                return false;
            }
        }
        if self.allow.is_empty() || self.allow.iter().any(|a| a == "*") {
            return true;
        }
        for a in &self.allow {
            let a_lower = a.to_ascii_lowercase();
            if name == a_lower || name.starts_with(&format!("{a_lower}.")) {
                return true;
            }
        }
        false
    }

    /// Policy for a spawned child agent: the denial list required by the
    /// orchestration contract, merged with this policy's own deny list.
    pub fn with_orchestration_denials(&self) -> ToolPolicy {
        let mut deny = self.deny.clone();
        for t in ["spawn_subagent", "query_agent", "wait_for_agents"] {
            if !deny.iter().any(|d| d.eq_ignore_ascii_case(t)) {
                deny.push(t.to_string());
            }
        }
        ToolPolicy {
            allow: self.allow.clone(),
            deny,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_1800000() -> u64 {
    1_800_000
}
fn d_3600000() -> u64 {
    3_600_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
