mod agents;
mod compaction;
mod context;
mod guardrail;
mod llm;
mod runtime;
mod workspace;

pub use agents::*;
pub use compaction::*;
pub use context::*;
pub use guardrail::*;
pub use llm::*;
pub use runtime::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub guardrail: GuardrailConfig,
    /// Named sub-agents that sessions may spawn children under.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

/// Severity of a single configuration validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Errors indicate the
    /// configuration cannot be used as-is; warnings are informational.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Compaction threshold must be a usable fraction of the context window.
        if !(0.0..1.0).contains(&self.compaction.threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "compaction.threshold".into(),
                message: format!(
                    "threshold must be in [0.0, 1.0) (got {})",
                    self.compaction.threshold
                ),
            });
        }

        // Threshold bands must be strictly increasing.
        let t = &self.context.thresholds;
        if !(t.warning < t.alert && t.alert < t.critical && t.critical < t.exceeded) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "context.thresholds".into(),
                message: format!(
                    "bands must be strictly increasing (warning={}, alert={}, critical={}, exceeded={})",
                    t.warning, t.alert, t.critical, t.exceeded
                ),
            });
        }

        // Truncation floor must not exceed the ceiling.
        if self.context.truncation_floor_chars > self.context.truncation_ceiling_chars {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "context.truncation_floor_chars".into(),
                message: "floor must not exceed truncation_ceiling_chars".into(),
            });
        }

        // Duplicate provider ids.
        let mut seen = std::collections::HashSet::new();
        for p in &self.llm.providers {
            if !seen.insert(p.id.clone()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "llm.providers".into(),
                    message: format!("duplicate provider id \"{}\"", p.id),
                });
            }
        }

        // Provider auth completeness by mode.
        for p in &self.llm.providers {
            match p.auth.mode {
                AuthMode::ApiKey | AuthMode::QueryParam => {
                    if p.auth.env.is_none() && p.auth.key.is_none() {
                        errors.push(ConfigError {
                            severity: ConfigSeverity::Warning,
                            field: format!("llm.providers[{}].auth", p.id),
                            message: "no env or key configured; provider will fail to authenticate".into(),
                        });
                    }
                }
                AuthMode::AwsSigv4 | AuthMode::None => {}
            }
        }

        // Startup policy with zero providers configured.
        if matches!(self.llm.startup_policy, LlmStartupPolicy::RequireOne) && self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.startup_policy".into(),
                message: "require_one set but no providers configured".into(),
            });
        }

        // Guardrail patterns must compile.
        if let Err(e) = self.guardrail.compile() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "guardrail".into(),
                message: format!("invalid regex pattern: {e}"),
            });
        }

        // Agent fan-out limits must be sane.
        for (name, agent) in &self.agents {
            if agent.limits.max_depth == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("agents.{name}.limits.max_depth"),
                    message: "max_depth must be at least 1".into(),
                });
            }
            if agent.limits.blocking_timeout_ms > agent.limits.hard_timeout_ms {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("agents.{name}.limits"),
                    message: "blocking_timeout_ms exceeds hard_timeout_ms; the blocking wait will never win the race".into(),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_clean() {
        let config = Config::default();
        let errors = config.validate();
        assert!(
            errors.iter().all(|e| e.severity == ConfigSeverity::Warning),
            "unexpected errors: {errors:?}"
        );
    }

    #[test]
    fn invalid_compaction_threshold_is_rejected() {
        let mut config = Config::default();
        config.compaction.threshold = 1.5;
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "compaction.threshold" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn duplicate_provider_ids_rejected() {
        let mut config = Config::default();
        config.llm.providers.push(ProviderConfig {
            id: "p1".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "http://localhost:11434".into(),
            auth: AuthConfig::default(),
            default_model: None,
        });
        config.llm.providers.push(ProviderConfig {
            id: "p1".into(),
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            auth: AuthConfig::default(),
            default_model: None,
        });
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "llm.providers" && e.message.contains("duplicate")));
    }

    #[test]
    fn zero_max_depth_rejected() {
        let mut config = Config::default();
        config.agents.insert(
            "reviewer".into(),
            AgentConfig {
                limits: AgentLimits {
                    max_depth: 0,
                    ..AgentLimits::default()
                },
                ..Default::default()
            },
        );
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.field.contains("max_depth")));
    }

    #[test]
    fn config_error_display_format() {
        let e = ConfigError {
            severity: ConfigSeverity::Error,
            field: "llm.providers".into(),
            message: "duplicate provider id \"p1\"".into(),
        };
        assert_eq!(e.to_string(), "[ERROR] llm.providers: duplicate provider id \"p1\"");
    }

    #[test]
    fn toml_round_trip() {
        let config = Config::default();
        let s = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.runtime.max_turns, config.runtime.max_turns);
    }
}
