use regex::RegexSet;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guardrail policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Guardrail rules evaluated by the Tool Executor before a tool call reaches
/// PreToolUse hooks. A rule match either blocks the call outright or attaches
/// a warning that rides along with the eventual result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Regex patterns matched against `{tool_name} {arguments_json}`. A
    /// match blocks the call before it is invoked.
    #[serde(default = "d_blocking_patterns")]
    pub blocking_patterns: Vec<String>,
    /// Regex patterns matched the same way as `blocking_patterns`, but a
    /// match only attaches a warning; the call still proceeds.
    #[serde(default)]
    pub warning_patterns: Vec<String>,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            blocking_patterns: d_blocking_patterns(),
            warning_patterns: Vec::new(),
        }
    }
}

fn d_blocking_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf\s+/".to_string(),
        r"mkfs\.".to_string(),
        r"dd\s+if=.+of=/dev/".to_string(),
    ]
}

impl GuardrailConfig {
    /// Compile this config into an evaluator. Invalid regex patterns are
    /// reported as `Err` rather than silently dropped, so config validation
    /// catches them before a session ever runs.
    pub fn compile(&self) -> Result<GuardrailEngine, regex::Error> {
        Ok(GuardrailEngine {
            blocking: RegexSet::new(&self.blocking_patterns)?,
            warning: RegexSet::new(&self.warning_patterns)?,
        })
    }
}

/// Compiled guardrail engine. Built once from `GuardrailConfig` and reused
/// across every tool invocation in a session.
pub struct GuardrailEngine {
    blocking: RegexSet,
    warning: RegexSet,
}

/// Outcome of evaluating a single tool call against the guardrail engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardrailVerdict {
    pub blocked: bool,
    pub triggered_rules: Vec<String>,
    pub warnings: Vec<String>,
}

impl GuardrailEngine {
    /// Evaluate a tool call. `haystack` is conventionally
    /// `"{tool_name} {arguments_json}"`.
    pub fn evaluate(&self, haystack: &str) -> GuardrailVerdict {
        let mut verdict = GuardrailVerdict::default();
        let block_matches: Vec<usize> = self.blocking.matches(haystack).into_iter().collect();
        if !block_matches.is_empty() {
            verdict.blocked = true;
            for i in &block_matches {
                verdict.triggered_rules.push(self.blocking.patterns()[*i].clone());
            }
        }
        for i in self.warning.matches(haystack).into_iter() {
            verdict.warnings.push(self.warning.patterns()[i].clone());
        }
        verdict
    }
}
