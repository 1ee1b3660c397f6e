//! Tool Executor: resolves a tool call, runs it through guardrails and
//! hooks, invokes it under an abort signal, and truncates its result through
//! the Context Manager's adaptive cap.
//!
//! Generalizes the teacher's concrete `dispatch_tool` match-on-name
//! dispatcher into a trait-based registry, since this runtime's tool set is
//! open-ended (host applications register their own tools) rather than the
//! teacher's fixed built-in set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tron_domain::config::GuardrailEngine;
use tron_domain::error::{Error, Result};
use tron_domain::tool::{ToolCall, ToolDefinition};

use crate::cancel::CancelToken;
use crate::context::ContextManager;
use crate::event_emitter::{CoreEvent, EventEmitter};

/// Which calling convention a tool implements. `Options` tools receive a
/// progress callback; `Contextual` tools do not use one even though the
/// executor always provides [`ToolExecutionContext::report_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContract {
    Options,
    Contextual,
}

/// A single block of tool result content before string coercion.
#[derive(Debug, Clone)]
pub enum ResultBlock {
    Text(String),
    Image,
}

/// The raw content a tool returns, before the safety-net coercion/truncation
/// pass. Most tools return `Text`; multi-modal tools return `Blocks`.
#[derive(Debug, Clone)]
pub enum ToolContent {
    Text(String),
    Blocks(Vec<ResultBlock>),
}

impl ToolContent {
    fn coerce_to_string(&self) -> String {
        match self {
            ToolContent::Text(s) => s.clone(),
            ToolContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ResultBlock::Text(t) => t.clone(),
                    ResultBlock::Image => "[image]".to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// What a [`Tool::execute`] call returns, before the executor's safety net
/// and hook passes wrap it into a [`ToolExecutionResponse`].
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: ToolContent,
    pub is_error: bool,
    pub details: Option<serde_json::Value>,
    /// When set, the Turn Runner ends the turn after this tool completes.
    pub stop_turn: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: ToolContent::Text(content.into()),
            is_error: false,
            details: None,
            stop_turn: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: ToolContent::Text(content.into()),
            is_error: true,
            details: None,
            stop_turn: false,
        }
    }
}

/// Per-invocation context handed to a tool's `execute`. Shape depends on the
/// tool's declared [`ExecutionContract`]: `options` tools get a live
/// `report_progress`; `contextual` tools get the same struct but the call is
/// withheld — the distinction is enforced here, not left to the tool to
/// honor voluntarily.
pub struct ToolExecutionContext<'a> {
    pub tool_call_id: String,
    pub session_id: String,
    pub signal: &'a CancelToken,
    contract: ExecutionContract,
    emitter: &'a EventEmitter,
}

impl<'a> ToolExecutionContext<'a> {
    /// Stream a progress chunk to the bus as `tool_execution_update`.
    /// No-op for a `contextual` tool — its contract has no progress stream,
    /// so a call here is silently dropped rather than honored.
    pub fn report_progress(&self, chunk: impl Into<String>) {
        if self.contract != ExecutionContract::Options {
            return;
        }
        self.emitter.emit(CoreEvent::ToolExecutionUpdate {
            session_id: self.session_id.clone(),
            timestamp: now(),
            tool_call_id: self.tool_call_id.clone(),
            update: chunk.into(),
        });
    }
}

/// A capability the Tool Executor can dispatch a call to.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    fn execution_contract(&self) -> ExecutionContract {
        ExecutionContract::Contextual
    }
    async fn execute(&self, arguments: serde_json::Value, ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome>;
}

/// Registry of tools available to a session, filtered by a [`ToolPolicy`]
/// when building the manifest exposed to the LLM.
///
/// [`ToolPolicy`]: tron_domain::config::ToolPolicy
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name.clone();
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Build the manifest exposed to the LLM, filtered by an optional
    /// sub-agent tool policy.
    pub fn definitions(&self, policy: Option<&tron_domain::config::ToolPolicy>) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(policy) = policy {
            defs.retain(|d| policy.allows(&d.name));
        }
        defs
    }
}

// ── Hooks ───────────────────────────────────────────────────────────

/// Lifecycle point a [`Hook`] is registered against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookType {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    Stop,
    SessionEnd,
}

/// What a pre-hook decided to do with a pending tool call.
#[derive(Debug, Clone)]
pub enum HookAction {
    Continue,
    Block { reason: String },
    Modify { modifications: serde_json::Value },
}

/// Context passed to a `PreToolUse`/`PostToolUse` hook.
pub struct HookContext {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub session_id: String,
    pub tool_call_id: String,
}

/// A fail-open lifecycle observer/gate. A hook that errors or exceeds its
/// timeout is treated as `Continue` — a hook must never be able to wedge a
/// turn by misbehaving.
#[async_trait]
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;
    fn hook_type(&self) -> HookType;
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
    async fn handle(&self, ctx: &HookContext) -> Result<HookAction>;
}

async fn run_hook(hook: &dyn Hook, ctx: &HookContext) -> HookAction {
    match tokio::time::timeout(hook.timeout(), hook.handle(ctx)).await {
        Ok(Ok(action)) => action,
        Ok(Err(e)) => {
            tracing::warn!(hook = hook.name(), error = %e, "hook errored; treating as continue");
            HookAction::Continue
        }
        Err(_) => {
            tracing::warn!(hook = hook.name(), "hook timed out; treating as continue");
            HookAction::Continue
        }
    }
}

/// Merge `modifications` onto `arguments`, one level deep. Only object
/// modifications are applied; anything else is ignored rather than
/// replacing the whole argument set out from under later hooks.
fn merge_modifications(arguments: &mut serde_json::Value, modifications: &serde_json::Value) {
    if let (Some(args_obj), Some(mods_obj)) = (arguments.as_object_mut(), modifications.as_object()) {
        for (k, v) in mods_obj {
            args_obj.insert(k.clone(), v.clone());
        }
    }
}

// ── Executor ────────────────────────────────────────────────────────

/// The response the Turn Runner receives for a single tool call.
#[derive(Debug, Clone)]
pub struct ToolExecutionResponse {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
    pub details: Option<serde_json::Value>,
    pub stop_turn: bool,
    pub duration_ms: u64,
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    guardrail: Option<GuardrailEngine>,
    pre_hooks: Vec<Arc<dyn Hook>>,
    post_hooks: Vec<Arc<dyn Hook>>,
    active_tool: Mutex<Option<String>>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            guardrail: None,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
            active_tool: Mutex::new(None),
        }
    }

    pub fn with_guardrail(mut self, engine: GuardrailEngine) -> Self {
        self.guardrail = Some(engine);
        self
    }

    pub fn add_pre_hook(&mut self, hook: Arc<dyn Hook>) {
        self.pre_hooks.push(hook);
    }

    pub fn add_post_hook(&mut self, hook: Arc<dyn Hook>) {
        self.post_hooks.push(hook);
    }

    pub fn active_tool(&self) -> Option<String> {
        self.active_tool.lock().clone()
    }

    pub async fn execute(
        &self,
        tool_call: &ToolCall,
        session_id: &str,
        cancel: &CancelToken,
        context_manager: &ContextManager,
        emitter: &EventEmitter,
    ) -> ToolExecutionResponse {
        let started = std::time::Instant::now();
        let duration_ms = |started: std::time::Instant| started.elapsed().as_millis() as u64;

        // 1. Resolve.
        let tool = match self.registry.get(&tool_call.tool_name) {
            Some(tool) => tool,
            None => {
                return ToolExecutionResponse {
                    tool_call_id: tool_call.call_id.clone(),
                    content: format!("Tool not found: {}", tool_call.tool_name),
                    is_error: true,
                    details: None,
                    stop_turn: false,
                    duration_ms: duration_ms(started),
                };
            }
        };

        // 2. Guardrail evaluation.
        let mut warnings = Vec::new();
        if let Some(engine) = &self.guardrail {
            let haystack = format!("{} {}", tool_call.tool_name, tool_call.arguments);
            let verdict = engine.evaluate(&haystack);
            if verdict.blocked {
                let reason = format!("blocked by guardrail: {}", verdict.triggered_rules.join(", "));
                return ToolExecutionResponse {
                    tool_call_id: tool_call.call_id.clone(),
                    content: reason,
                    is_error: true,
                    details: None,
                    stop_turn: false,
                    duration_ms: duration_ms(started),
                };
            }
            warnings = verdict.warnings;
        }

        // 3. PreToolUse hooks.
        let mut arguments = tool_call.arguments.clone();
        if !self.pre_hooks.is_empty() {
            emitter.emit(CoreEvent::HookTriggered {
                session_id: session_id.to_string(),
                timestamp: now(),
                hook_event: "PreToolUse".into(),
                hook_names: self.pre_hooks.iter().map(|h| h.name().to_string()).collect(),
            });

            for hook in &self.pre_hooks {
                let ctx = HookContext {
                    tool_name: tool_call.tool_name.clone(),
                    arguments: arguments.clone(),
                    session_id: session_id.to_string(),
                    tool_call_id: tool_call.call_id.clone(),
                };
                match run_hook(hook.as_ref(), &ctx).await {
                    HookAction::Continue => {}
                    HookAction::Block { reason } => {
                        emitter.emit(CoreEvent::HookCompleted {
                            session_id: session_id.to_string(),
                            timestamp: now(),
                            hook_event: "PreToolUse".into(),
                        });
                        return ToolExecutionResponse {
                            tool_call_id: tool_call.call_id.clone(),
                            content: format!("blocked by hook '{}': {reason}", hook.name()),
                            is_error: true,
                            details: None,
                            stop_turn: false,
                            duration_ms: duration_ms(started),
                        };
                    }
                    HookAction::Modify { modifications } => {
                        merge_modifications(&mut arguments, &modifications);
                    }
                }
            }

            emitter.emit(CoreEvent::HookCompleted {
                session_id: session_id.to_string(),
                timestamp: now(),
                hook_event: "PreToolUse".into(),
            });
        }

        // 4. Invoke.
        *self.active_tool.lock() = Some(tool_call.tool_name.clone());
        emitter.emit(CoreEvent::ToolExecutionStart {
            session_id: session_id.to_string(),
            timestamp: now(),
            tool_call_id: tool_call.call_id.clone(),
            tool_name: tool_call.tool_name.clone(),
            arguments: arguments.clone(),
        });

        let exec_ctx = ToolExecutionContext {
            tool_call_id: tool_call.call_id.clone(),
            session_id: session_id.to_string(),
            signal: cancel,
            contract: tool.execution_contract(),
            emitter,
        };

        let outcome = match tool.execute(arguments, exec_ctx).await {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome {
                content: ToolContent::Text(format!("Tool execution error: {e}")),
                is_error: true,
                details: None,
                stop_turn: false,
            },
        };

        *self.active_tool.lock() = None;

        // 5. Safety net: coerce to string, truncate through the Context Manager.
        let coerced = outcome.content.coerce_to_string();
        let processed = context_manager.process_tool_result(&coerced);
        let mut details = outcome.details.clone();
        if processed.truncated {
            let mut map = details
                .take()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();
            map.insert("truncated".into(), serde_json::Value::Bool(true));
            map.insert("original_size".into(), serde_json::json!(processed.original_size));
            details = Some(serde_json::Value::Object(map));
        }
        if !warnings.is_empty() {
            let mut map = details
                .take()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();
            map.insert("warnings".into(), serde_json::json!(warnings));
            details = Some(serde_json::Value::Object(map));
        }

        // 6. PostToolUse hooks — logging/auditing only, cannot modify the result.
        if !self.post_hooks.is_empty() {
            emitter.emit(CoreEvent::HookTriggered {
                session_id: session_id.to_string(),
                timestamp: now(),
                hook_event: "PostToolUse".into(),
                hook_names: self.post_hooks.iter().map(|h| h.name().to_string()).collect(),
            });
            let ctx = HookContext {
                tool_name: tool_call.tool_name.clone(),
                arguments: tool_call.arguments.clone(),
                session_id: session_id.to_string(),
                tool_call_id: tool_call.call_id.clone(),
            };
            for hook in &self.post_hooks {
                let _ = run_hook(hook.as_ref(), &ctx).await;
            }
            emitter.emit(CoreEvent::HookCompleted {
                session_id: session_id.to_string(),
                timestamp: now(),
                hook_event: "PostToolUse".into(),
            });
        }

        let duration = duration_ms(started);

        // 7. Emit and return.
        emitter.emit(CoreEvent::ToolExecutionEnd {
            session_id: session_id.to_string(),
            timestamp: now(),
            tool_call_id: tool_call.call_id.clone(),
            duration_ms: duration,
            is_error: outcome.is_error,
            result: processed.content.clone(),
        });

        ToolExecutionResponse {
            tool_call_id: tool_call.call_id.clone(),
            content: processed.content,
            is_error: outcome.is_error,
            details,
            stop_turn: outcome.stop_turn,
            duration_ms: duration,
        }
    }
}

/// Categorize a thrown tool error per the error taxonomy (§7), used by
/// callers that need to decide whether a failed tool call is recoverable.
pub fn categorize_tool_error(tool_name: &str, message: impl Into<String>) -> Error {
    Error::ToolExecution {
        tool: tool_name.to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tron_domain::config::GuardrailConfig;

    struct EchoTool;
    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echoes input".into(),
                parameters: serde_json::json!({"type": "object"}),
                category: Default::default(),
                requires_confirmation: false,
            }
        }
        async fn execute(&self, arguments: serde_json::Value, _ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
            Ok(ToolOutcome::ok(arguments.to_string()))
        }
    }

    struct ProgressTool;
    #[async_trait]
    impl Tool for ProgressTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "progress".into(),
                description: "Streams progress".into(),
                parameters: serde_json::json!({"type": "object"}),
                category: Default::default(),
                requires_confirmation: false,
            }
        }
        fn execution_contract(&self) -> ExecutionContract {
            ExecutionContract::Options
        }
        async fn execute(&self, _arguments: serde_json::Value, ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
            ctx.report_progress("halfway");
            Ok(ToolOutcome::ok("done"))
        }
    }

    struct BlockingPreHook;
    #[async_trait]
    impl Hook for BlockingPreHook {
        fn name(&self) -> &str {
            "blocking-pre-hook"
        }
        fn hook_type(&self) -> HookType {
            HookType::PreToolUse
        }
        async fn handle(&self, _ctx: &HookContext) -> Result<HookAction> {
            Ok(HookAction::Block { reason: "not allowed right now".into() })
        }
    }

    struct ModifyingPreHook;
    #[async_trait]
    impl Hook for ModifyingPreHook {
        fn name(&self) -> &str {
            "modifying-pre-hook"
        }
        fn hook_type(&self) -> HookType {
            HookType::PreToolUse
        }
        async fn handle(&self, _ctx: &HookContext) -> Result<HookAction> {
            Ok(HookAction::Modify { modifications: serde_json::json!({"injected": true}) })
        }
    }

    struct PanickyHook;
    #[async_trait]
    impl Hook for PanickyHook {
        fn name(&self) -> &str {
            "erroring-hook"
        }
        fn hook_type(&self) -> HookType {
            HookType::PreToolUse
        }
        async fn handle(&self, _ctx: &HookContext) -> Result<HookAction> {
            Err(Error::Other("boom".into()))
        }
    }

    fn context_manager() -> ContextManager {
        ContextManager::new("claude-sonnet-4-5", 100_000)
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            call_id: "call-1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn missing_tool_returns_error_without_invoking_anything() {
        let executor = ToolExecutor::new(ToolRegistry::new());
        let response = executor
            .execute(&call("nope", serde_json::json!({})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(response.is_error);
        assert!(response.content.contains("Tool not found"));
    }

    #[tokio::test]
    async fn resolved_tool_executes_and_returns_content() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let executor = ToolExecutor::new(registry);
        let response = executor
            .execute(&call("echo", serde_json::json!({"x": 1})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(!response.is_error);
        assert_eq!(response.content, r#"{"x":1}"#);
    }

    #[tokio::test]
    async fn guardrail_blocks_dangerous_call_before_invocation() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let executor = ToolExecutor::new(registry).with_guardrail(GuardrailConfig::default().compile().unwrap());
        let response = executor
            .execute(&call("echo", serde_json::json!({"command": "rm -rf /"})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(response.is_error);
        assert!(response.content.contains("guardrail"));
    }

    #[tokio::test]
    async fn blocking_pre_hook_short_circuits_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let mut executor = ToolExecutor::new(registry);
        executor.add_pre_hook(Arc::new(BlockingPreHook));
        let response = executor
            .execute(&call("echo", serde_json::json!({})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(response.is_error);
        assert!(response.content.contains("not allowed right now"));
    }

    #[tokio::test]
    async fn modifying_pre_hook_merges_into_arguments_seen_by_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let mut executor = ToolExecutor::new(registry);
        executor.add_pre_hook(Arc::new(ModifyingPreHook));
        let response = executor
            .execute(&call("echo", serde_json::json!({"x": 1})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(response.content.contains("\"injected\":true"));
    }

    #[tokio::test]
    async fn erroring_hook_fails_open_as_continue() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let mut executor = ToolExecutor::new(registry);
        executor.add_pre_hook(Arc::new(PanickyHook));
        let response = executor
            .execute(&call("echo", serde_json::json!({})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(!response.is_error);
    }

    #[tokio::test]
    async fn large_result_is_truncated_through_context_manager() {
        struct HugeTool;
        #[async_trait]
        impl Tool for HugeTool {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: "huge".into(),
                    description: "".into(),
                    parameters: serde_json::json!({}),
                    category: Default::default(),
                    requires_confirmation: false,
                }
            }
            async fn execute(&self, _arguments: serde_json::Value, _ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
                Ok(ToolOutcome::ok("x".repeat(200_000)))
            }
        }
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(HugeTool));
        let executor = ToolExecutor::new(registry);
        let response = executor
            .execute(&call("huge", serde_json::json!({})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(response.content.ends_with("[truncated]"));
        assert_eq!(response.details.unwrap()["truncated"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn progress_tool_reports_updates_via_event_bus() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ProgressTool));
        let executor = ToolExecutor::new(registry);
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        emitter.add(move |event| {
            if let CoreEvent::ToolExecutionUpdate { update, .. } = event {
                seen2.lock().push(update.clone());
            }
        });
        let response = executor
            .execute(&call("progress", serde_json::json!({})), "s1", &CancelToken::new(), &context_manager(), &emitter)
            .await;
        assert!(!response.is_error);
        assert_eq!(*seen.lock(), vec!["halfway".to_string()]);
    }

    #[tokio::test]
    async fn contextual_tool_attempting_progress_is_a_silent_no_op() {
        struct SneakyContextualTool;
        #[async_trait]
        impl Tool for SneakyContextualTool {
            fn definition(&self) -> ToolDefinition {
                ToolDefinition {
                    name: "sneaky".into(),
                    description: "".into(),
                    parameters: serde_json::json!({}),
                    category: Default::default(),
                    requires_confirmation: false,
                }
            }
            // Contract defaults to `Contextual` — no override here.
            async fn execute(&self, _arguments: serde_json::Value, ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
                ctx.report_progress("should never reach a listener");
                Ok(ToolOutcome::ok("done"))
            }
        }
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SneakyContextualTool));
        let executor = ToolExecutor::new(registry);
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        emitter.add(move |event| {
            if let CoreEvent::ToolExecutionUpdate { update, .. } = event {
                seen2.lock().push(update.clone());
            }
        });
        let response = executor
            .execute(&call("sneaky", serde_json::json!({})), "s1", &CancelToken::new(), &context_manager(), &emitter)
            .await;
        assert!(!response.is_error);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn tool_execution_start_carries_the_final_arguments_after_hook_modification() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let mut executor = ToolExecutor::new(registry);
        executor.add_pre_hook(Arc::new(ModifyingPreHook));
        let emitter = EventEmitter::new();
        let seen_args = Arc::new(Mutex::new(None));
        let seen_args2 = seen_args.clone();
        emitter.add(move |event| {
            if let CoreEvent::ToolExecutionStart { arguments, .. } = event {
                *seen_args2.lock() = Some(arguments.clone());
            }
        });
        executor
            .execute(&call("echo", serde_json::json!({"x": 1})), "s1", &CancelToken::new(), &context_manager(), &emitter)
            .await;
        assert_eq!(seen_args.lock().clone().unwrap()["injected"], serde_json::json!(true));
    }

    #[tokio::test]
    async fn tool_execution_end_carries_the_final_result_text() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let executor = ToolExecutor::new(registry);
        let emitter = EventEmitter::new();
        let seen_result = Arc::new(Mutex::new(None));
        let seen_result2 = seen_result.clone();
        emitter.add(move |event| {
            if let CoreEvent::ToolExecutionEnd { result, .. } = event {
                *seen_result2.lock() = Some(result.clone());
            }
        });
        let response = executor
            .execute(&call("echo", serde_json::json!({"x": 1})), "s1", &CancelToken::new(), &context_manager(), &emitter)
            .await;
        assert_eq!(seen_result.lock().clone().unwrap(), response.content);
    }

    #[tokio::test]
    async fn active_tool_is_cleared_after_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let executor = ToolExecutor::new(registry);
        executor
            .execute(&call("echo", serde_json::json!({})), "s1", &CancelToken::new(), &context_manager(), &EventEmitter::new())
            .await;
        assert!(executor.active_tool().is_none());
    }
}
