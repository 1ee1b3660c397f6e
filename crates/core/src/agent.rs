//! Subagent Orchestration: spawning, tracking, and awaiting child sessions.
//!
//! Grounded on the teacher's `gateway/src/runtime/agent.rs` (`AgentManager`,
//! `AgentContext`, `run_agent`'s cancel-group registration and event-drain
//! shape), generalized from the teacher's single `agent.run` tool wired to
//! one hard-coded turn function into three capabilities — spawn, query, and
//! wait — driven against the already-finalized [`SessionController`] and
//! [`TurnRunner`], and from a blocking-only in-process call into the spec's
//! three spawn modes (`subsession`, `tmux`, `fork`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use uuid::Uuid;

use tron_domain::config::{AgentLimits, ToolPolicy};
use tron_domain::error::{Error, Result};
use tron_domain::session::{Session, SpawnType};
use tron_domain::tool::{Message, ToolCategory, ToolDefinition, Usage};

use crate::cancel::CancelMap;
use crate::context::ContextManager;
use crate::event_emitter::{CoreEvent, EventEmitter};
use crate::session::SessionController;
use crate::tools::{Tool, ToolExecutionContext, ToolOutcome, ToolRegistry};
use crate::turn::{run_until_done, TurnRunner};

/// Denylisted on every subagent's tool manifest regardless of its policy —
/// subagents cannot themselves spawn subagents or manage the host.
const SUBAGENT_DENYLIST: &[&str] = &["agent.spawn", "agent.query", "agent.wait", "host.deploy", "host.restart"];

/// Turns that seed a blocking subsession's estimated-response budget.
const CHILD_ESTIMATED_RESPONSE_TOKENS: u32 = 1_000;

/// Ceiling on how many turns a single spawned child may run before the
/// orchestrator stops looping it, independent of the caller's timeout.
const CHILD_MAX_TURNS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    All,
    Any,
}

/// How a spawn call returns control to its caller.
#[derive(Debug, Clone)]
pub enum SpawnOutcome {
    /// The child finished before the blocking timeout elapsed.
    Completed { child_session_id: String, outcome: SubagentOutcome },
    /// The blocking timeout elapsed first; the child keeps running.
    StillRunning { child_session_id: String },
    /// Fire-and-forget: `tmux` spawns, or `blocking=false` subsessions.
    Detached { child_session_id: String, tmux_session_name: Option<String> },
}

#[derive(Debug, Clone)]
pub struct SubagentOutcome {
    pub success: bool,
    pub text: String,
    pub token_usage: Usage,
}

impl SubagentOutcome {
    fn failed(text: impl Into<String>) -> Self {
        Self { success: false, text: text.into(), token_usage: Usage::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubagentStatus {
    Running,
    Completed,
    Failed,
}

/// One child's completion state, shared between the background task that
/// runs it and every `query`/`wait` caller observing it.
struct SubagentHandle {
    status: RwLock<SubagentStatus>,
    tx: watch::Sender<Option<SubagentOutcome>>,
    rx: watch::Receiver<Option<SubagentOutcome>>,
}

impl SubagentHandle {
    fn new() -> Arc<Self> {
        let (tx, rx) = watch::channel(None);
        Arc::new(Self { status: RwLock::new(SubagentStatus::Running), tx, rx })
    }

    fn complete(&self, outcome: SubagentOutcome) {
        *self.status.write() = if outcome.success { SubagentStatus::Completed } else { SubagentStatus::Failed };
        let _ = self.tx.send(Some(outcome));
    }

    fn status(&self) -> SubagentStatus {
        *self.status.read()
    }

    /// Waits for completion. Resolves immediately if the outcome already
    /// landed before this call started watching.
    async fn wait(&self) -> SubagentOutcome {
        let mut rx = self.rx.clone();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return SubagentOutcome::failed("subagent handle dropped before completion");
            }
        }
    }
}

/// Per-parent registry mapping child session id -> completion handle. Holds
/// every child ever spawned by a parent, completed or not, until the
/// orchestrator is asked to forget them (there is no explicit eviction path
/// here; a long-lived parent session's registry grows with its children,
/// same as its event log does).
#[derive(Default)]
struct SubAgentTracker {
    by_parent: RwLock<HashMap<String, HashMap<String, Arc<SubagentHandle>>>>,
}

impl SubAgentTracker {
    fn insert(&self, parent_id: &str, child_id: &str, handle: Arc<SubagentHandle>) {
        self.by_parent.write().entry(parent_id.to_string()).or_default().insert(child_id.to_string(), handle);
    }

    fn get(&self, parent_id: &str, child_id: &str) -> Option<Arc<SubagentHandle>> {
        self.by_parent.read().get(parent_id)?.get(child_id).cloned()
    }
}

/// Owns the mechanics of spawning, tracking, and awaiting child sessions.
/// Shares the parent's [`SessionController`], [`CancelMap`], and
/// [`EventEmitter`] rather than owning independent copies, so a child's
/// durable events and cancellation cascade land in the same places the
/// parent's do.
pub struct AgentOrchestrator {
    sessions: Arc<SessionController>,
    cancel_map: Arc<CancelMap>,
    emitter: Arc<EventEmitter>,
    runner: Arc<TurnRunner>,
    tool_registry: Arc<ToolRegistry>,
    limits: AgentLimits,
    tracker: SubAgentTracker,
}

impl AgentOrchestrator {
    pub fn new(
        sessions: Arc<SessionController>,
        cancel_map: Arc<CancelMap>,
        emitter: Arc<EventEmitter>,
        runner: Arc<TurnRunner>,
        tool_registry: Arc<ToolRegistry>,
        limits: AgentLimits,
    ) -> Self {
        Self { sessions, cancel_map, emitter, runner, tool_registry, limits, tracker: SubAgentTracker::default() }
    }

    fn child_tools_manifest(&self, policy: &ToolPolicy) -> Vec<tron_domain::tool::ToolDefinition> {
        self.tool_registry
            .definitions(Some(policy))
            .into_iter()
            .filter(|def| !SUBAGENT_DENYLIST.contains(&def.name.as_str()))
            .collect()
    }

    /// `SpawnSubagent` with `spawn_type = subsession`: in-process, sharing
    /// the durable log. If `blocking`, the caller awaits completion up to
    /// `timeout` (default from [`AgentLimits::blocking_timeout_ms`]); past
    /// that the child keeps running and the caller gets `StillRunning`.
    pub async fn spawn_subsession(
        &self,
        parent_session_id: &str,
        task: impl Into<String>,
        model_override: Option<String>,
        tool_policy: ToolPolicy,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<SpawnOutcome> {
        let task = task.into();
        let parent = self
            .sessions
            .get(parent_session_id)
            .ok_or_else(|| Error::Other(format!("session {parent_session_id} is not active")))?;
        let parent_snapshot = parent.snapshot();

        let model = model_override.unwrap_or_else(|| parent_snapshot.latest_model.clone());
        let context_limit = parent.with_context(|ctx| ctx.get_context_limit()).await;

        let child_id = Uuid::new_v4().to_string();
        let mut session = Session::new(&child_id, &parent_snapshot.workspace_id, &model);
        session.parent_session_id = Some(parent_session_id.to_string());
        session.spawning_session_id = Some(parent_session_id.to_string());
        session.spawn_type = Some(SpawnType::Subsession);
        session.spawn_task = Some(task.clone());
        session.working_directory = parent_snapshot.working_directory.clone();

        let mut context = ContextManager::new(&model, context_limit);
        context.set_tools_manifest(self.child_tools_manifest(&tool_policy));

        let child = self.sessions.activate(session, context);
        self.sessions
            .append_user_message(&child_id, &parent_snapshot.workspace_id, Message::user(task))
            .await?;

        let cancel = self.cancel_map.register(&child_id);
        self.cancel_map.add_to_group(parent_session_id, &child_id);

        let handle = SubagentHandle::new();
        self.tracker.insert(parent_session_id, &child_id, handle.clone());

        self.emitter.emit(CoreEvent::SubagentSpawned {
            session_id: parent_session_id.to_string(),
            timestamp: Utc::now(),
            child_session_id: child_id.clone(),
            spawn_type: "subsession".to_string(),
        });

        let working_directory = child.snapshot().working_directory.unwrap_or_default();
        self.run_child_in_background(child.clone(), cancel, handle.clone(), working_directory, parent_session_id.to_string(), child_id.clone());

        if blocking {
            let budget = timeout.unwrap_or_else(|| Duration::from_millis(self.limits.blocking_timeout_ms));
            let parent_cancel = self.cancel_map.get(parent_session_id);
            tokio::select! {
                outcome = handle.wait() => Ok(SpawnOutcome::Completed { child_session_id: child_id, outcome }),
                _ = tokio::time::sleep(budget) => Ok(SpawnOutcome::StillRunning { child_session_id: child_id }),
                _ = Self::wait_for_parent_cancel(&parent_cancel) => Ok(SpawnOutcome::StillRunning { child_session_id: child_id }),
            }
        } else {
            Ok(SpawnOutcome::Detached { child_session_id: child_id, tmux_session_name: None })
        }
    }

    /// Resolves when `parent_cancel` fires, or never if the parent has no
    /// registered token (e.g. it isn't itself running under a tracked turn).
    /// Lets the blocking-subsession race treat "no cancel signal available"
    /// and "cancel signal never fires" identically.
    async fn wait_for_parent_cancel(parent_cancel: &Option<crate::cancel::CancelToken>) {
        match parent_cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }

    /// `SpawnSubagent` with `spawn_type = tmux`: always fire-and-forget. The
    /// session record and event chain are identical to a subsession's; only
    /// the multiplexer attachment (an external collaborator, out of scope
    /// here — see `SPEC_FULL.md` §1) differs, represented by a synthetic
    /// session name the caller can hand to its own tmux client.
    pub async fn spawn_tmux(
        &self,
        parent_session_id: &str,
        task: impl Into<String>,
        model_override: Option<String>,
        tool_policy: ToolPolicy,
    ) -> Result<SpawnOutcome> {
        let task = task.into();
        let parent = self
            .sessions
            .get(parent_session_id)
            .ok_or_else(|| Error::Other(format!("session {parent_session_id} is not active")))?;
        let parent_snapshot = parent.snapshot();

        let model = model_override.unwrap_or_else(|| parent_snapshot.latest_model.clone());
        let context_limit = parent.with_context(|ctx| ctx.get_context_limit()).await;

        let child_id = Uuid::new_v4().to_string();
        let tmux_session_name = format!("tron-agent-{}", &child_id[..8]);

        let mut session = Session::new(&child_id, &parent_snapshot.workspace_id, &model);
        session.parent_session_id = Some(parent_session_id.to_string());
        session.spawning_session_id = Some(parent_session_id.to_string());
        session.spawn_type = Some(SpawnType::Tmux);
        session.spawn_task = Some(task.clone());
        session.working_directory = parent_snapshot.working_directory.clone();

        let mut context = ContextManager::new(&model, context_limit);
        context.set_tools_manifest(self.child_tools_manifest(&tool_policy));

        let child = self.sessions.activate(session, context);
        self.sessions
            .append_user_message(&child_id, &parent_snapshot.workspace_id, Message::user(task))
            .await?;

        let cancel = self.cancel_map.register(&child_id);
        self.cancel_map.add_to_group(parent_session_id, &child_id);

        let handle = SubagentHandle::new();
        self.tracker.insert(parent_session_id, &child_id, handle.clone());

        self.emitter.emit(CoreEvent::SubagentSpawned {
            session_id: parent_session_id.to_string(),
            timestamp: Utc::now(),
            child_session_id: child_id.clone(),
            spawn_type: "tmux".to_string(),
        });

        let working_directory = child.snapshot().working_directory.unwrap_or_default();
        self.run_child_in_background(child, cancel, handle, working_directory, parent_session_id.to_string(), child_id.clone());

        Ok(SpawnOutcome::Detached { child_session_id: child_id, tmux_session_name: Some(tmux_session_name) })
    }

    /// `SpawnSubagent` with `spawn_type = fork`: the child's message history
    /// is seeded from the parent's chain up to `fork_from_event_id` and the
    /// child starts ready for the caller to drive directly, rather than
    /// running a task to completion on its own the way `subsession`/`tmux`
    /// do. Tracked and queryable the same as any other spawn, just with its
    /// handle already resolved since there is no background run to await.
    pub async fn fork_session(&self, parent_session_id: &str, fork_from_event_id: Uuid, tool_policy: ToolPolicy) -> Result<SpawnOutcome> {
        let parent = self
            .sessions
            .get(parent_session_id)
            .ok_or_else(|| Error::Other(format!("session {parent_session_id} is not active")))?;
        let parent_snapshot = parent.snapshot();

        let model = parent_snapshot.latest_model.clone();
        let context_limit = parent.with_context(|ctx| ctx.get_context_limit()).await;
        let history = self.sessions.get_messages(parent_session_id, Some(fork_from_event_id))?;

        let child_id = Uuid::new_v4().to_string();
        self.sessions
            .append_forked_root(&child_id, &parent_snapshot.workspace_id, fork_from_event_id, parent_session_id.to_string())
            .await?;

        let mut session = Session::new(&child_id, &parent_snapshot.workspace_id, &model);
        session.parent_session_id = Some(parent_session_id.to_string());
        session.spawning_session_id = Some(parent_session_id.to_string());
        session.spawn_type = Some(SpawnType::Fork);
        session.fork_from_event_id = Some(fork_from_event_id);
        session.working_directory = parent_snapshot.working_directory.clone();

        let mut context = ContextManager::new(&model, context_limit);
        context.set_tools_manifest(self.child_tools_manifest(&tool_policy));
        context.set_messages(history);

        self.sessions.activate(session, context);

        let cancel = self.cancel_map.register(&child_id);
        self.cancel_map.add_to_group(parent_session_id, &child_id);
        // Forks don't run in the background, so there's nothing to cancel
        // yet — registering still keeps the cancel-group membership
        // consistent for whenever the caller drives a turn through it.
        drop(cancel);

        let handle = SubagentHandle::new();
        handle.complete(SubagentOutcome { success: true, text: String::new(), token_usage: Usage::default() });
        self.tracker.insert(parent_session_id, &child_id, handle);

        self.emitter.emit(CoreEvent::SubagentSpawned {
            session_id: parent_session_id.to_string(),
            timestamp: Utc::now(),
            child_session_id: child_id.clone(),
            spawn_type: "fork".to_string(),
        });

        Ok(SpawnOutcome::Detached { child_session_id: child_id, tmux_session_name: None })
    }

    fn run_child_in_background(
        &self,
        child: Arc<crate::session::ActiveSession>,
        cancel: crate::cancel::CancelToken,
        handle: Arc<SubagentHandle>,
        working_directory: String,
        parent_session_id: String,
        child_session_id: String,
    ) {
        let runner = self.runner.clone();
        let emitter = self.emitter.clone();
        let cancel_map = self.cancel_map.clone();
        let hard_timeout = Duration::from_millis(self.limits.hard_timeout_ms);
        tokio::spawn(async move {
            let run = run_until_done(&runner, &child, &cancel, &working_directory, CHILD_ESTIMATED_RESPONSE_TOKENS, CHILD_MAX_TURNS);

            let outcome = match tokio::time::timeout(hard_timeout, run).await {
                Ok(results) => match results.last() {
                    Some(last) => SubagentOutcome {
                        success: last.success,
                        text: last.message.as_ref().map(|m| m.content.extract_all_text()).unwrap_or_default(),
                        token_usage: results.iter().filter_map(|r| r.token_usage).fold(Usage::default(), |mut acc, u| {
                            acc.input_tokens += u.input_tokens;
                            acc.output_tokens += u.output_tokens;
                            acc.total_tokens += u.total_tokens;
                            acc
                        }),
                    },
                    None => SubagentOutcome::failed("child produced no turns"),
                },
                Err(_) => {
                    cancel.cancel();
                    SubagentOutcome::failed("child exceeded its hard guardrail timeout")
                }
            };

            emitter.emit(CoreEvent::SubagentCompleted {
                session_id: parent_session_id.clone(),
                timestamp: Utc::now(),
                child_session_id: child_session_id.clone(),
                success: outcome.success,
            });

            handle.complete(outcome);
            cancel_map.remove(&child_session_id);
            cancel_map.remove_from_group(&parent_session_id, &child_session_id);
        });
    }

    /// `QueryAgent`: read-only status snapshot of a child — no mutation, no
    /// waiting.
    pub fn query_agent(&self, parent_session_id: &str, child_session_id: &str) -> Result<QueryResult> {
        let handle = self
            .tracker
            .get(parent_session_id, child_session_id)
            .ok_or_else(|| Error::Other(format!("no subagent {child_session_id} tracked under {parent_session_id}")))?;

        let session = self.sessions.get_state(child_session_id);
        let recent_messages = self.sessions.get_messages(child_session_id, None)?;
        let recent_messages = recent_messages.into_iter().rev().take(5).rev().collect();

        Ok(QueryResult {
            status: handle.status(),
            session,
            recent_messages,
        })
    }

    /// `WaitForAgents`: blocks until `all` or `any` of `child_session_ids`
    /// complete, or `timeout` elapses first.
    pub async fn wait_for_agents(
        &self,
        parent_session_id: &str,
        child_session_ids: &[String],
        mode: WaitMode,
        timeout: Duration,
    ) -> Result<WaitResult> {
        let handles: Vec<(String, Arc<SubagentHandle>)> = child_session_ids
            .iter()
            .map(|id| {
                self.tracker
                    .get(parent_session_id, id)
                    .map(|h| (id.clone(), h))
                    .ok_or_else(|| Error::Other(format!("no subagent {id} tracked under {parent_session_id}")))
            })
            .collect::<Result<_>>()?;

        let wait_future = async {
            match mode {
                WaitMode::All => {
                    let mut outcomes = HashMap::new();
                    for (id, handle) in &handles {
                        outcomes.insert(id.clone(), handle.wait().await);
                    }
                    outcomes
                }
                WaitMode::Any => {
                    use futures_util::stream::FuturesUnordered;
                    use futures_util::StreamExt;
                    let mut pending: FuturesUnordered<_> = handles
                        .iter()
                        .map(|(id, handle)| {
                            let id = id.clone();
                            let handle = handle.clone();
                            Box::pin(async move { (id, handle.wait().await) })
                        })
                        .collect();
                    let mut outcomes = HashMap::new();
                    if let Some((id, outcome)) = pending.next().await {
                        outcomes.insert(id, outcome);
                    }
                    outcomes
                }
            }
        };

        match tokio::time::timeout(timeout, wait_future).await {
            Ok(outcomes) => Ok(WaitResult { timed_out: false, outcomes }),
            Err(_) => Ok(WaitResult { timed_out: true, outcomes: HashMap::new() }),
        }
    }

    /// Wraps `spawn`/`query`/`wait` as real tools and registers them into
    /// `registry`, so a model's own tool call is the path that reaches this
    /// orchestrator — not just direct Rust callers.
    pub fn register_tools(self: &Arc<Self>, registry: &mut ToolRegistry) {
        registry.register(Arc::new(SpawnSubagentTool { orchestrator: self.clone() }));
        registry.register(Arc::new(QueryAgentTool { orchestrator: self.clone() }));
        registry.register(Arc::new(WaitForAgentsTool { orchestrator: self.clone() }));
    }
}

/// `agent.spawn` — dispatches to whichever of `subsession`/`tmux`/`fork` the
/// call asks for. The only path by which a model's own tool call reaches
/// [`AgentOrchestrator`].
struct SpawnSubagentTool {
    orchestrator: Arc<AgentOrchestrator>,
}

#[async_trait]
impl Tool for SpawnSubagentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent.spawn".into(),
            description: "Spawn a subagent: an in-process subsession, a detached tmux session, or a forked copy of this session's history.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "spawn_type": {"type": "string", "enum": ["subsession", "tmux", "fork"]},
                    "task": {"type": "string", "description": "Task prompt for the child. Required for subsession/tmux."},
                    "model": {"type": "string"},
                    "blocking": {"type": "boolean", "description": "subsession only; defaults to true"},
                    "timeout_ms": {"type": "integer"},
                    "fork_from_event_id": {"type": "string", "description": "Required for fork."}
                },
                "required": ["spawn_type"]
            }),
            category: ToolCategory::Agent,
            requires_confirmation: false,
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
        let spawn_type = arguments.get("spawn_type").and_then(|v| v.as_str()).unwrap_or("subsession");
        let model = arguments.get("model").and_then(|v| v.as_str()).map(str::to_string);
        let timeout = arguments.get("timeout_ms").and_then(|v| v.as_u64()).map(Duration::from_millis);

        let outcome = match spawn_type {
            "subsession" => {
                let task = arguments.get("task").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let blocking = arguments.get("blocking").and_then(|v| v.as_bool()).unwrap_or(true);
                self.orchestrator
                    .spawn_subsession(&ctx.session_id, task, model, ToolPolicy::default(), blocking, timeout)
                    .await?
            }
            "tmux" => {
                let task = arguments.get("task").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                self.orchestrator.spawn_tmux(&ctx.session_id, task, model, ToolPolicy::default()).await?
            }
            "fork" => {
                let fork_from_event_id = arguments
                    .get("fork_from_event_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| Error::Other("fork requires a valid fork_from_event_id".into()))?;
                self.orchestrator.fork_session(&ctx.session_id, fork_from_event_id, ToolPolicy::default()).await?
            }
            other => return Ok(ToolOutcome::error(format!("unknown spawn_type: {other}"))),
        };

        Ok(ToolOutcome::ok(spawn_outcome_summary(&outcome)))
    }
}

fn spawn_outcome_summary(outcome: &SpawnOutcome) -> String {
    match outcome {
        SpawnOutcome::Completed { child_session_id, outcome } => {
            serde_json::json!({"status": "completed", "child_session_id": child_session_id, "success": outcome.success, "text": outcome.text}).to_string()
        }
        SpawnOutcome::StillRunning { child_session_id } => {
            serde_json::json!({"status": "still_running", "child_session_id": child_session_id}).to_string()
        }
        SpawnOutcome::Detached { child_session_id, tmux_session_name } => {
            serde_json::json!({"status": "detached", "child_session_id": child_session_id, "tmux_session_name": tmux_session_name}).to_string()
        }
    }
}

/// `agent.query` — read-only status snapshot of a previously spawned child.
struct QueryAgentTool {
    orchestrator: Arc<AgentOrchestrator>,
}

#[async_trait]
impl Tool for QueryAgentTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent.query".into(),
            description: "Read-only status snapshot of a previously spawned subagent.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"child_session_id": {"type": "string"}},
                "required": ["child_session_id"]
            }),
            category: ToolCategory::Agent,
            requires_confirmation: false,
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
        let child_session_id = arguments
            .get("child_session_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Other("child_session_id is required".into()))?;
        let result = self.orchestrator.query_agent(&ctx.session_id, child_session_id)?;
        let recent: Vec<String> = result.recent_messages.iter().map(|m| m.content.extract_all_text()).collect();
        Ok(ToolOutcome::ok(
            serde_json::json!({
                "status": format!("{:?}", result.status).to_lowercase(),
                "recent_messages": recent,
            })
            .to_string(),
        ))
    }
}

/// `agent.wait` — blocks until `all`/`any` of the named children complete or
/// `timeout_ms` elapses, defaulting to the blocking-spawn timeout.
struct WaitForAgentsTool {
    orchestrator: Arc<AgentOrchestrator>,
}

#[async_trait]
impl Tool for WaitForAgentsTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "agent.wait".into(),
            description: "Block until all (or any) of the given subagents complete, or a timeout elapses.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "child_session_ids": {"type": "array", "items": {"type": "string"}},
                    "mode": {"type": "string", "enum": ["all", "any"]},
                    "timeout_ms": {"type": "integer"}
                },
                "required": ["child_session_ids"]
            }),
            category: ToolCategory::Agent,
            requires_confirmation: false,
        }
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: ToolExecutionContext<'_>) -> Result<ToolOutcome> {
        let ids: Vec<String> = arguments
            .get("child_session_ids")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let mode = match arguments.get("mode").and_then(|v| v.as_str()) {
            Some("any") => WaitMode::Any,
            _ => WaitMode::All,
        };
        let timeout = arguments
            .get("timeout_ms")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(1_800_000));

        let result = self.orchestrator.wait_for_agents(&ctx.session_id, &ids, mode, timeout).await?;
        let outcomes: serde_json::Map<String, serde_json::Value> = result
            .outcomes
            .iter()
            .map(|(id, outcome)| (id.clone(), serde_json::json!({"success": outcome.success, "text": outcome.text})))
            .collect();
        Ok(ToolOutcome::ok(serde_json::json!({"timed_out": result.timed_out, "outcomes": outcomes}).to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub status: SubagentStatus,
    pub session: Option<Session>,
    pub recent_messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct WaitResult {
    pub timed_out: bool,
    pub outcomes: HashMap<String, SubagentOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::event_log::EventLog;
    use crate::tools::{Tool, ToolExecutionContext, ToolExecutor, ToolOutcome};
    use async_trait::async_trait;
    use tron_domain::error::Result as DomainResult;
    use tron_domain::session::Session as DomainSession;
    use tron_domain::stream::{BoxStream, StreamEvent};
    use tron_domain::tool::{StopReason, ToolCall, ToolDefinition};
    use tron_providers::{LlmProvider, StreamContext, StreamOptions};

    struct OneShotProvider;

    #[async_trait]
    impl LlmProvider for OneShotProvider {
        fn id(&self) -> &str {
            "one-shot"
        }
        fn model(&self) -> &str {
            "one-shot-model"
        }
        fn capabilities(&self) -> &tron_domain::capability::LlmCapabilities {
            static CAPS: std::sync::OnceLock<tron_domain::capability::LlmCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(Default::default)
        }
        async fn stream(&self, _context: StreamContext, _options: StreamOptions) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            let message = Message::assistant("child done");
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(StreamEvent::Done { message, stop_reason: StopReason::EndTurn })])))
        }
    }

    struct NoopTool;
    #[async_trait]
    impl Tool for NoopTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition { name: "noop".into(), description: "".into(), parameters: serde_json::json!({}), category: Default::default(), requires_confirmation: false }
        }
        async fn execute(&self, _arguments: serde_json::Value, _ctx: ToolExecutionContext<'_>) -> DomainResult<ToolOutcome> {
            Ok(ToolOutcome::ok(""))
        }
    }

    fn orchestrator() -> (AgentOrchestrator, Arc<SessionController>, tempfile::TempDir) {
        let (orchestrator, sessions, _cancel_map, dir) = orchestrator_with(Arc::new(OneShotProvider), AgentLimits::default());
        (orchestrator, sessions, dir)
    }

    fn orchestrator_with(
        provider: Arc<dyn LlmProvider>,
        limits: AgentLimits,
    ) -> (AgentOrchestrator, Arc<SessionController>, Arc<CancelMap>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionController::new(Arc::new(EventLog::new(dir.path()))));
        let cancel_map = Arc::new(CancelMap::new());
        let emitter = Arc::new(EventEmitter::new());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NoopTool));
        let registry = Arc::new(registry);
        let executor = Arc::new(ToolExecutor::new(ToolRegistry::new()));
        let runner = Arc::new(TurnRunner::new(provider, executor, emitter.clone(), sessions.clone()));
        let orchestrator = AgentOrchestrator::new(sessions.clone(), cancel_map.clone(), emitter, runner, registry, limits);
        (orchestrator, sessions, cancel_map, dir)
    }

    /// Sleeps past whatever window the test needs to race against before
    /// resolving, so the assertion is on "did the race return early", not on
    /// "did the provider ever complete".
    struct SlowProvider {
        delay: Duration,
    }

    #[async_trait]
    impl LlmProvider for SlowProvider {
        fn id(&self) -> &str {
            "slow"
        }
        fn model(&self) -> &str {
            "slow-model"
        }
        fn capabilities(&self) -> &tron_domain::capability::LlmCapabilities {
            static CAPS: std::sync::OnceLock<tron_domain::capability::LlmCapabilities> = std::sync::OnceLock::new();
            CAPS.get_or_init(Default::default)
        }
        async fn stream(&self, _context: StreamContext, _options: StreamOptions) -> DomainResult<BoxStream<'static, DomainResult<StreamEvent>>> {
            tokio::time::sleep(self.delay).await;
            let message = Message::assistant("eventually done");
            Ok(Box::pin(futures_util::stream::iter(vec![Ok(StreamEvent::Done { message, stop_reason: StopReason::EndTurn })])))
        }
    }

    #[tokio::test]
    async fn blocking_subsession_completes_within_timeout() {
        let (orchestrator, sessions, _dir) = orchestrator();
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let outcome = orchestrator
            .spawn_subsession("parent", "do the thing", None, ToolPolicy::default(), true, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        match outcome {
            SpawnOutcome::Completed { outcome, .. } => {
                assert!(outcome.success);
                assert_eq!(outcome.text, "child done");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tmux_spawn_is_always_detached() {
        let (orchestrator, sessions, _dir) = orchestrator();
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let outcome = orchestrator.spawn_tmux("parent", "run in background", None, ToolPolicy::default()).await.unwrap();
        match outcome {
            SpawnOutcome::Detached { tmux_session_name, .. } => assert!(tmux_session_name.is_some()),
            other => panic!("expected Detached, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn query_agent_reports_status_after_completion() {
        let (orchestrator, sessions, _dir) = orchestrator();
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let outcome = orchestrator
            .spawn_subsession("parent", "task", None, ToolPolicy::default(), true, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        let child_id = match outcome {
            SpawnOutcome::Completed { child_session_id, .. } => child_session_id,
            other => panic!("expected Completed, got {other:?}"),
        };

        let result = orchestrator.query_agent("parent", &child_id).unwrap();
        assert_eq!(result.status, SubagentStatus::Completed);
    }

    #[tokio::test]
    async fn wait_for_agents_any_returns_as_soon_as_one_completes() {
        let (orchestrator, sessions, _dir) = orchestrator();
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let a = orchestrator.spawn_subsession("parent", "a", None, ToolPolicy::default(), false, None).await.unwrap();
        let b = orchestrator.spawn_subsession("parent", "b", None, ToolPolicy::default(), false, None).await.unwrap();
        let ids = vec![
            match a {
                SpawnOutcome::Detached { child_session_id, .. } => child_session_id,
                other => panic!("expected Detached, got {other:?}"),
            },
            match b {
                SpawnOutcome::Detached { child_session_id, .. } => child_session_id,
                other => panic!("expected Detached, got {other:?}"),
            },
        ];

        let result = orchestrator.wait_for_agents("parent", &ids, WaitMode::Any, Duration::from_secs(5)).await.unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.outcomes.len(), 1);
    }

    #[tokio::test]
    async fn wait_for_agents_with_no_children_resolves_immediately() {
        let (orchestrator, sessions, _dir) = orchestrator();
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let result = orchestrator.wait_for_agents("parent", &[], WaitMode::All, Duration::from_millis(50)).await.unwrap();
        assert!(!result.timed_out);
        assert!(result.outcomes.is_empty());
    }

    #[tokio::test]
    async fn fork_session_seeds_child_history_up_to_the_fork_point_only() {
        let (orchestrator, sessions, _dir) = orchestrator();
        let parent = DomainSession::new("parent", "ws1", "model-x");
        let context = ContextManager::new("model-x", 100_000);
        sessions.activate(parent, context);

        let e1 = sessions.append_user_message("parent", "ws1", Message::user("first")).await.unwrap();
        sessions.append_user_message("parent", "ws1", Message::user("second")).await.unwrap();

        let outcome = orchestrator.fork_session("parent", e1.id, ToolPolicy::default()).await.unwrap();
        let child_id = match outcome {
            SpawnOutcome::Detached { child_session_id, .. } => child_session_id,
            other => panic!("expected Detached, got {other:?}"),
        };

        // The durable log only carries the fork marker event — the seeded
        // history lives in the child's context manager, not duplicated into
        // its own chain.
        let child_log_events = sessions.get_events(&child_id).unwrap();
        assert_eq!(child_log_events.len(), 1);
        assert!(matches!(&child_log_events[0].payload, tron_domain::event::EventPayload::SessionForked { .. }));

        let child = sessions.get(&child_id).unwrap();
        let seeded = child.with_context(|ctx| ctx.get_messages()).await;
        assert_eq!(seeded.len(), 1);

        let child_state = sessions.get_state(&child_id).unwrap();
        assert_eq!(child_state.fork_from_event_id, Some(e1.id));
        assert_eq!(child_state.spawn_type, Some(tron_domain::session::SpawnType::Fork));

        let result = orchestrator.query_agent("parent", &child_id).unwrap();
        assert_eq!(result.status, SubagentStatus::Completed);
    }

    #[tokio::test]
    async fn blocking_subsession_returns_still_running_as_soon_as_parent_is_cancelled() {
        let (orchestrator, sessions, cancel_map, _dir) =
            orchestrator_with(Arc::new(SlowProvider { delay: Duration::from_secs(2) }), AgentLimits::default());
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));
        let parent_token = cancel_map.register("parent");

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            parent_token.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_millis(500),
            orchestrator.spawn_subsession("parent", "do the thing", None, ToolPolicy::default(), true, Some(Duration::from_secs(30))),
        )
        .await
        .expect("parent cancellation should have ended the blocking wait well before the 500ms budget")
        .unwrap();

        assert!(matches!(outcome, SpawnOutcome::StillRunning { .. }));
    }

    #[tokio::test]
    async fn detached_child_is_failed_once_it_exceeds_its_hard_guardrail_timeout() {
        let mut limits = AgentLimits::default();
        limits.hard_timeout_ms = 30;
        let (orchestrator, sessions, _cancel_map, _dir) =
            orchestrator_with(Arc::new(SlowProvider { delay: Duration::from_secs(2) }), limits);
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let outcome = orchestrator.spawn_subsession("parent", "task", None, ToolPolicy::default(), false, None).await.unwrap();
        let child_id = match outcome {
            SpawnOutcome::Detached { child_session_id, .. } => child_session_id,
            other => panic!("expected Detached, got {other:?}"),
        };

        tokio::time::sleep(Duration::from_millis(200)).await;
        let result = orchestrator.query_agent("parent", &child_id).unwrap();
        assert_eq!(result.status, SubagentStatus::Failed);
    }

    #[tokio::test]
    async fn agent_spawn_tool_reaches_the_orchestrator_through_the_tool_executor() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionController::new(Arc::new(EventLog::new(dir.path()))));
        let cancel_map = Arc::new(CancelMap::new());
        let emitter = Arc::new(EventEmitter::new());
        let child_registry = Arc::new(ToolRegistry::new());
        let executor_for_children = Arc::new(ToolExecutor::new(ToolRegistry::new()));
        let runner = Arc::new(TurnRunner::new(Arc::new(OneShotProvider), executor_for_children, emitter.clone(), sessions.clone()));
        let orchestrator = Arc::new(AgentOrchestrator::new(
            sessions.clone(),
            cancel_map,
            emitter.clone(),
            runner,
            child_registry,
            AgentLimits::default(),
        ));

        let mut registry = ToolRegistry::new();
        orchestrator.register_tools(&mut registry);
        let executor = ToolExecutor::new(registry);

        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let call = ToolCall {
            call_id: "call-1".into(),
            tool_name: "agent.spawn".into(),
            arguments: serde_json::json!({"spawn_type": "subsession", "task": "do the thing", "timeout_ms": 5_000}),
        };
        let response = executor
            .execute(&call, "parent", &CancelToken::new(), &ContextManager::new("model-x", 100_000), &emitter)
            .await;

        assert!(!response.is_error, "tool call failed: {}", response.content);
        let parsed: serde_json::Value = serde_json::from_str(&response.content).unwrap();
        assert_eq!(parsed["status"], "completed");
        assert_eq!(parsed["text"], "child done");
    }

    #[tokio::test]
    async fn wait_for_agents_reports_timeout_for_an_unknown_child() {
        let (orchestrator, sessions, _dir) = orchestrator();
        let parent = DomainSession::new("parent", "ws1", "model-x");
        sessions.activate(parent, ContextManager::new("model-x", 100_000));

        let err = orchestrator
            .wait_for_agents("parent", &["ghost".to_string()], WaitMode::All, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
