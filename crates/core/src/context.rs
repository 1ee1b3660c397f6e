//! Context Manager: owns a session's message history, estimates and tracks
//! token usage against the model's context window, and gates whether a new
//! turn can proceed.
//!
//! Truncation of oversized tool results follows the floor/ceiling scaling
//! shape used for workspace-file truncation elsewhere in this codebase,
//! adapted to scale against *remaining context budget* rather than a fixed
//! total cap.

use tron_domain::config::{CompactionConfig, ContextConfig};
use tron_domain::session::{ContextBand, ContextBreakdown, ContextSnapshot, SessionSnapshot};
use tron_domain::tool::{Message, ToolDefinition};

/// Deterministic token estimate: ~4 characters per token, the same rough
/// ratio the teacher's workspace truncation budgets were tuned against.
fn estimate_tokens(chars: usize) -> u32 {
    ((chars as f64) / 4.0).ceil() as u32
}

fn estimate_message_tokens(message: &Message) -> u32 {
    let content_chars = match &message.content {
        tron_domain::tool::MessageContent::Text(t) => t.len(),
        tron_domain::tool::MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                tron_domain::tool::ContentPart::Text { text } => text.len(),
                tron_domain::tool::ContentPart::ToolUse { input, .. } => input.to_string().len(),
                tron_domain::tool::ContentPart::ToolResult { content, .. } => content.len(),
                tron_domain::tool::ContentPart::Image { .. } => 256,
                tron_domain::tool::ContentPart::Thinking { thinking } => thinking.len(),
            })
            .sum(),
    };
    // Fixed per-message overhead for role/metadata framing.
    estimate_tokens(content_chars) + 4
}

/// Outcome of [`ContextManager::can_accept_turn`].
#[derive(Debug, Clone, PartialEq)]
pub struct TurnAdmission {
    pub can_proceed: bool,
    pub needs_compaction: bool,
    pub would_exceed_limit: bool,
    pub current_tokens: u32,
    pub estimated_after_turn: u32,
    pub context_limit: u32,
    pub error: Option<String>,
}

/// Result of [`ContextManager::process_tool_result`].
#[derive(Debug, Clone)]
pub struct ProcessedToolResult {
    pub content: String,
    pub truncated: bool,
    pub original_size: usize,
}

/// A single message's contribution, as reported by
/// [`ContextManager::get_detailed_snapshot`].
#[derive(Debug, Clone)]
pub struct MessageSummary {
    pub role: String,
    pub estimated_tokens: u32,
    /// First 120 characters of the message's text content.
    pub preview: String,
}

/// [`ContextSnapshot`] plus a per-message breakdown, for callers that want
/// to show the user where the budget actually went rather than just the
/// aggregate bands.
#[derive(Debug, Clone)]
pub struct DetailedContextSnapshot {
    pub snapshot: ContextSnapshot,
    pub messages: Vec<MessageSummary>,
}

/// Owns message history, token accounting, and truncation policy for a
/// single session.
pub struct ContextManager {
    messages: Vec<Message>,
    model: String,
    provider_id: String,
    context_limit: u32,
    system_prompt: String,
    tools_manifest: Vec<ToolDefinition>,
    rules_content: String,
    /// Last authoritative token count reported by the provider. `None` means
    /// no response has landed yet (or one of the resetting events occurred),
    /// so callers fall back to the component estimate.
    api_context_tokens: Option<u32>,
    context_config: ContextConfig,
    compaction_config: CompactionConfig,
}

impl ContextManager {
    pub fn new(model: impl Into<String>, context_limit: u32) -> Self {
        Self {
            messages: Vec::new(),
            model: model.into(),
            provider_id: String::new(),
            context_limit,
            system_prompt: String::new(),
            tools_manifest: Vec::new(),
            rules_content: String::new(),
            api_context_tokens: None,
            context_config: ContextConfig::default(),
            compaction_config: CompactionConfig::default(),
        }
    }

    pub fn with_context_config(mut self, config: ContextConfig) -> Self {
        self.context_config = config;
        self
    }

    pub fn with_compaction_config(mut self, config: CompactionConfig) -> Self {
        self.compaction_config = config;
        self
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    pub fn get_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn get_tools_manifest(&self) -> Vec<ToolDefinition> {
        self.tools_manifest.clone()
    }

    pub fn set_tools_manifest(&mut self, tools: Vec<ToolDefinition>) {
        self.tools_manifest = tools;
    }

    pub fn set_rules_content(&mut self, rules: impl Into<String>) {
        self.rules_content = rules.into();
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Replace the entire history. Resets the authoritative token baseline,
    /// since whatever the provider last reported no longer describes it.
    pub fn set_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
        self.api_context_tokens = None;
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
        self.api_context_tokens = None;
    }

    /// Defensive copy — callers cannot mutate the manager's own history
    /// through the returned vector.
    pub fn get_messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Record the provider's authoritative input-token count from the last
    /// response. Superseded by component estimates whenever the history is
    /// replaced or cleared.
    pub fn set_api_context_tokens(&mut self, tokens: u32) {
        self.api_context_tokens = Some(tokens);
    }

    fn breakdown(&self) -> ContextBreakdown {
        ContextBreakdown {
            system_prompt: estimate_tokens(self.system_prompt.len()),
            tools: estimate_tokens(
                self.tools_manifest
                    .iter()
                    .map(|t| t.parameters.to_string().len() + t.description.len() + t.name.len())
                    .sum(),
            ),
            rules: estimate_tokens(self.rules_content.len()),
            messages: self.messages.iter().map(estimate_message_tokens).sum(),
        }
    }

    /// Authoritative count when available; otherwise the sum of component
    /// estimates. The estimate is never less than the sum of its parts.
    pub fn get_current_tokens(&self) -> u32 {
        if let Some(tokens) = self.api_context_tokens {
            return tokens;
        }
        let b = self.breakdown();
        b.system_prompt + b.tools + b.rules + b.messages
    }

    pub fn get_context_limit(&self) -> u32 {
        self.context_limit
    }

    pub fn get_model(&self) -> &str {
        &self.model
    }

    pub fn set_provider_id(&mut self, provider_id: impl Into<String>) {
        self.provider_id = provider_id.into();
    }

    pub fn get_provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Atomically switch model and context limit, recomputing the threshold
    /// band. Returns `true` if the new band is at or above `alert` — the
    /// caller is responsible for firing its compaction-needed callback.
    pub fn switch_model(&mut self, new_model: impl Into<String>, new_context_limit: u32) -> bool {
        self.model = new_model.into();
        self.context_limit = new_context_limit;
        let snapshot = self.get_snapshot();
        matches!(snapshot.threshold_level, ContextBand::Alert | ContextBand::Critical | ContextBand::Exceeded)
    }

    pub fn get_snapshot(&self) -> ContextSnapshot {
        let current = self.get_current_tokens();
        ContextSnapshot::new(current, self.context_limit, self.breakdown(), &self.context_config.thresholds)
    }

    /// `getDetailedSnapshot` — the same snapshot plus a per-message summary,
    /// for callers showing the user where the budget went rather than just
    /// the aggregate band.
    pub fn get_detailed_snapshot(&self) -> DetailedContextSnapshot {
        let messages = self
            .messages
            .iter()
            .map(|m| {
                let text = m.content.extract_all_text();
                let preview: String = text.chars().take(120).collect();
                MessageSummary {
                    role: format!("{:?}", m.role).to_lowercase(),
                    estimated_tokens: estimate_message_tokens(m),
                    preview,
                }
            })
            .collect();
        DetailedContextSnapshot {
            snapshot: self.get_snapshot(),
            messages,
        }
    }

    /// `exportState` — a restorable point-in-time view. Round-trips with
    /// [`Self::restore_state`]: `{model, messages, system_prompt}` survive
    /// unchanged, and `provider_id`/`tools_manifest` travel along with them.
    pub fn export_state(&self) -> SessionSnapshot {
        SessionSnapshot {
            model: self.model.clone(),
            provider_id: self.provider_id.clone(),
            system_prompt: self.system_prompt.clone(),
            messages: self.messages.clone(),
            tools_manifest: self.tools_manifest.clone(),
        }
    }

    /// `restoreState` — the inverse of [`Self::export_state`]. Resets the
    /// authoritative token baseline the same way [`Self::set_messages`]
    /// does, since the restored history invalidates whatever the provider
    /// last reported.
    pub fn restore_state(&mut self, snapshot: SessionSnapshot) {
        self.model = snapshot.model;
        self.provider_id = snapshot.provider_id;
        self.system_prompt = snapshot.system_prompt;
        self.messages = snapshot.messages;
        self.tools_manifest = snapshot.tools_manifest;
        self.api_context_tokens = None;
    }

    /// `can_accept_turn` — see the turn-admission rule cascade.
    pub fn can_accept_turn(&self, estimated_response_tokens: u32, auto_compaction_available: bool) -> TurnAdmission {
        let current = self.get_current_tokens();
        let estimated_after_turn = current + estimated_response_tokens;
        let limit = self.context_limit;

        if estimated_after_turn > limit {
            return TurnAdmission {
                can_proceed: false,
                needs_compaction: auto_compaction_available,
                would_exceed_limit: true,
                current_tokens: current,
                estimated_after_turn,
                context_limit: limit,
                error: Some("Context limit exceeded".into()),
            };
        }

        let fraction = if limit == 0 { 1.0 } else { current as f64 / limit as f64 };
        let thresholds = &self.context_config.thresholds;

        if fraction >= thresholds.critical {
            return TurnAdmission {
                can_proceed: false,
                needs_compaction: true,
                would_exceed_limit: false,
                current_tokens: current,
                estimated_after_turn,
                context_limit: limit,
                error: None,
            };
        }

        if fraction >= thresholds.alert {
            return TurnAdmission {
                can_proceed: true,
                needs_compaction: true,
                would_exceed_limit: false,
                current_tokens: current,
                estimated_after_turn,
                context_limit: limit,
                error: None,
            };
        }

        TurnAdmission {
            can_proceed: true,
            needs_compaction: false,
            would_exceed_limit: false,
            current_tokens: current,
            estimated_after_turn,
            context_limit: limit,
            error: None,
        }
    }

    /// `validatePreTurn` — the runner-facing shape of `can_accept_turn`: when
    /// there is no summarizer configured, `needs_compaction` collapses to
    /// `false` and a blocked turn surfaces a definite error instead.
    pub fn validate_pre_turn(&self, estimated_response_tokens: u32, summarizer_available: bool) -> TurnAdmission {
        let mut admission = self.can_accept_turn(estimated_response_tokens, summarizer_available);
        if !summarizer_available {
            admission.needs_compaction = false;
            if !admission.can_proceed && admission.error.is_none() {
                admission.error = Some("Context limit exceeded and no summarizer is configured".into());
            }
        }
        admission
    }

    pub fn should_compact(&self) -> bool {
        let snapshot = self.get_snapshot();
        snapshot.usage_percent >= self.compaction_config.threshold
    }

    pub fn preserve_recent_turns(&self) -> usize {
        self.compaction_config.preserve_recent_turns
    }

    /// Nominal cap ~100,000 chars, scaled down proportionally as remaining
    /// budget shrinks, floored at `truncation_floor_chars`.
    pub fn get_max_tool_result_size(&self) -> usize {
        let ceiling = self.context_config.truncation_ceiling_chars;
        let floor = self.context_config.truncation_floor_chars;
        let limit = self.context_limit.max(1) as f64;
        let current = self.get_current_tokens() as f64;
        let remaining_fraction = ((limit - current) / limit).clamp(0.0, 1.0);
        let scaled = (ceiling as f64 * remaining_fraction) as usize;
        scaled.clamp(floor, ceiling)
    }

    /// Truncate a tool result's content to the adaptive maximum, appending a
    /// `[truncated]` marker when it was cut.
    pub fn process_tool_result(&self, content: &str) -> ProcessedToolResult {
        let max_chars = self.get_max_tool_result_size();
        let original_size = content.len();
        if original_size <= max_chars {
            return ProcessedToolResult {
                content: content.to_string(),
                truncated: false,
                original_size,
            };
        }
        let boundary = content.floor_char_boundary(max_chars);
        let mut truncated = content[..boundary].to_string();
        truncated.push_str("\n\n[truncated]");
        ProcessedToolResult {
            content: truncated,
            truncated: true,
            original_size,
        }
    }
}
