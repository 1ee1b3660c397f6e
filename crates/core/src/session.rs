//! Session Controller: the in-memory *active session* record and the
//! linearization chain every external mutation runs through.
//!
//! Grounded on the teacher's `sessions/src/store.rs` active-entry shape,
//! generalized from a single mutex-guarded struct to a per-session serial
//! chain (`run_in_chain`) so concurrent callers queue rather than block each
//! other's unrelated reads.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use tron_domain::error::{Error, Result};
use tron_domain::event::{Event, EventPayload};
use tron_domain::session::Session;

use crate::context::ContextManager;
use crate::event_log::EventLog;

/// An active session's in-memory record plus the machinery that serializes
/// mutation against it: the chain lock (linearized appends), the processing
/// flag (at most one turn at a time), and the context manager it owns while
/// live.
pub struct ActiveSession {
    record: RwLock<Session>,
    chain: AsyncMutex<()>,
    processing: AtomicBool,
    current_run_id: RwLock<Option<String>>,
    todo_tracker: RwLock<Vec<String>>,
    context: AsyncMutex<ContextManager>,
}

impl ActiveSession {
    pub fn id(&self) -> String {
        self.record.read().id.clone()
    }

    pub fn snapshot(&self) -> Session {
        self.record.read().clone()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn set_processing(&self, value: bool) {
        self.processing.store(value, Ordering::Release);
    }

    pub fn touch(&self) {
        self.record.write().last_activity_at = Utc::now();
    }

    pub fn current_run_id(&self) -> Option<String> {
        self.current_run_id.read().clone()
    }

    pub fn set_current_run_id(&self, id: Option<String>) {
        *self.current_run_id.write() = id;
    }

    pub fn todos(&self) -> Vec<String> {
        self.todo_tracker.read().clone()
    }

    pub fn set_todos(&self, items: Vec<String>) {
        *self.todo_tracker.write() = items;
    }

    fn set_model(&self, model: String) {
        self.record.write().latest_model = model;
    }

    /// Run `f` against this session's context manager. Held only for the
    /// duration of the closure, not across an `.await` of unrelated work.
    pub async fn with_context<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut ContextManager) -> T,
    {
        let mut ctx = self.context.lock().await;
        f(&mut ctx)
    }

    /// Holds the context manager's lock across an `.await`, for callers
    /// (the Tool Executor dispatch) that need live access spanning an async
    /// call rather than a single synchronous closure.
    pub async fn lock_context(&self) -> tokio::sync::MutexGuard<'_, ContextManager> {
        self.context.lock().await
    }

    /// Serializes `f` against every other `run_in_chain` call on this
    /// session, so an append started while another is in flight always sees
    /// the true head once its turn comes. Every external mutation — event
    /// appends, deletions, model switches — must go through this.
    pub async fn run_in_chain<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.chain.lock().await;
        f().await
    }
}

/// Outcome of a `switch_model` call, mirroring what the provider swap needs
/// to decide whether a compaction pass should run before the next turn.
#[derive(Debug, Clone)]
pub struct ModelSwitchOutcome {
    pub previous_model: String,
    pub new_model: String,
    /// `true` when the new context band is already at or above alert —
    /// the Turn Runner should treat this as a compaction-needed signal.
    pub needs_compaction: bool,
}

/// Owns the durable log and the table of currently-active sessions. Inactive
/// sessions (no entry in the table) still accept direct appends — there's no
/// concurrent writer to race, so the linearization chain isn't needed.
pub struct SessionController {
    log: Arc<EventLog>,
    active: RwLock<HashMap<String, Arc<ActiveSession>>>,
}

impl SessionController {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self {
            log,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn activate(&self, session: Session, context: ContextManager) -> Arc<ActiveSession> {
        let id = session.id.clone();
        let active = Arc::new(ActiveSession {
            record: RwLock::new(session),
            chain: AsyncMutex::new(()),
            processing: AtomicBool::new(false),
            current_run_id: RwLock::new(None),
            todo_tracker: RwLock::new(Vec::new()),
            context: AsyncMutex::new(context),
        });
        self.active.write().insert(id, active.clone());
        active
    }

    pub fn deactivate(&self, session_id: &str) {
        self.active.write().remove(session_id);
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<ActiveSession>> {
        self.active.read().get(session_id).cloned()
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active.read().contains_key(session_id)
    }

    /// Linearized for an active session through its serial chain; direct
    /// append otherwise.
    pub async fn append(&self, session_id: &str, workspace_id: &str, payload: EventPayload) -> Result<Event> {
        match self.get(session_id) {
            Some(active) => {
                let log = self.log.clone();
                let session_id = session_id.to_string();
                let workspace_id = workspace_id.to_string();
                let event = active
                    .run_in_chain(move || async move { log.append(&session_id, &workspace_id, payload) })
                    .await?;
                active.touch();
                Ok(event)
            }
            None => self.log.append(session_id, workspace_id, payload),
        }
    }

    /// Appends a `message.deleted` tombstone through the same chain a
    /// regular append would use.
    pub async fn delete_message(&self, session_id: &str, workspace_id: &str, target_event_id: uuid::Uuid) -> Result<Event> {
        self.append(session_id, workspace_id, EventPayload::MessageDeleted { target_event_id }).await
    }

    /// Appends a user message to the durable log and, if the session is
    /// active, mirrors it into the live Context Manager's message array —
    /// the Context Manager owns the array; this is what keeps the durable
    /// log an accurate shadow of it.
    pub async fn append_user_message(&self, session_id: &str, workspace_id: &str, message: tron_domain::tool::Message) -> Result<Event> {
        let event = self.append(session_id, workspace_id, EventPayload::MessageUser { message: message.clone() }).await?;
        if let Some(active) = self.get(session_id) {
            active.with_context(|ctx| ctx.add_message(message)).await;
        }
        Ok(event)
    }

    /// Appends an assistant message, mirroring it the same way.
    pub async fn append_assistant_message(&self, session_id: &str, workspace_id: &str, message: tron_domain::tool::Message) -> Result<Event> {
        let event = self.append(session_id, workspace_id, EventPayload::MessageAssistant { message: message.clone() }).await?;
        if let Some(active) = self.get(session_id) {
            active.with_context(|ctx| ctx.add_message(message)).await;
        }
        Ok(event)
    }

    /// Appends a tool-call intent event (no context-manager mirror: tool
    /// calls live inside the assistant message that carries them, not as
    /// their own entry in the message array).
    pub async fn append_tool_call(&self, session_id: &str, workspace_id: &str, call: tron_domain::tool::ToolCall) -> Result<Event> {
        self.append(session_id, workspace_id, EventPayload::ToolCallEvent { call }).await
    }

    /// Appends a tool result event and mirrors it into the Context Manager
    /// as a `Role::Tool` message.
    pub async fn append_tool_result(&self, session_id: &str, workspace_id: &str, tool_use_id: String, content: String, is_error: bool) -> Result<Event> {
        let event = self
            .append(
                session_id,
                workspace_id,
                EventPayload::ToolResult { tool_use_id: tool_use_id.clone(), content: content.clone(), is_error },
            )
            .await?;
        if let Some(active) = self.get(session_id) {
            let mut message = tron_domain::tool::Message::tool_result(tool_use_id, content);
            if is_error {
                if let tron_domain::tool::MessageContent::Parts(parts) = &mut message.content {
                    if let Some(tron_domain::tool::ContentPart::ToolResult { is_error, .. }) = parts.first_mut() {
                        *is_error = true;
                    }
                }
            }
            active.with_context(|ctx| ctx.add_message(message)).await;
        }
        Ok(event)
    }

    /// Appends a forked child's synthetic root event directly to the log.
    /// Always called before `activate`, so there is no active-session chain
    /// to linearize against yet.
    pub async fn append_forked_root(&self, session_id: &str, workspace_id: &str, fork_from_event_id: uuid::Uuid, forked_from_session_id: String) -> Result<Event> {
        self.log.append_forked_root(session_id, workspace_id, fork_from_event_id, forked_from_session_id)
    }

    pub fn get_state(&self, session_id: &str) -> Option<Session> {
        self.get(session_id).map(|a| a.snapshot())
    }

    pub fn get_messages(&self, session_id: &str, at_event: Option<uuid::Uuid>) -> Result<Vec<tron_domain::tool::Message>> {
        self.log.get_messages(session_id, at_event)
    }

    pub fn get_events(&self, session_id: &str) -> Result<Vec<Event>> {
        self.log.get_events(session_id)
    }

    pub fn get_ancestors(&self, session_id: &str, event_id: uuid::Uuid) -> Result<Vec<Event>> {
        self.log.get_ancestors(session_id, event_id)
    }

    pub fn search(&self, session_id: &str, query: &str) -> Result<Vec<Event>> {
        self.log.search(session_id, query)
    }

    /// Waits for this session's chain to drain: acquiring and immediately
    /// releasing the lock is enough since every append holds it for its
    /// full duration.
    pub async fn flush(&self, session_id: &str) {
        if let Some(active) = self.get(session_id) {
            active.run_in_chain(|| async {}).await;
        }
    }

    pub async fn flush_all(&self) {
        let sessions: Vec<_> = self.active.read().values().cloned().collect();
        for active in sessions {
            active.run_in_chain(|| async {}).await;
        }
    }

    /// The atomic model-switch sequence: validate not processing, linearize
    /// the `config.model_switch` event, update the authoritative model
    /// field, then reset the context manager's token baseline for the new
    /// model/limit. Step 4's credential/provider swap is the caller's
    /// responsibility — this only owns the parts the session record and
    /// context manager are authoritative over.
    pub async fn switch_model(&self, session_id: &str, new_model: impl Into<String>, new_context_limit: u32) -> Result<ModelSwitchOutcome> {
        let active = self
            .get(session_id)
            .ok_or_else(|| Error::Other(format!("session {session_id} is not active")))?;

        if active.is_processing() {
            return Err(Error::Other(format!("session {session_id} is processing; cannot switch model")));
        }

        let new_model = new_model.into();
        let previous_model = active.snapshot().latest_model;
        let workspace_id = active.snapshot().workspace_id;

        self.append(session_id, &workspace_id, EventPayload::ConfigModelSwitch { model: new_model.clone() })
            .await?;

        active.set_model(new_model.clone());

        let needs_compaction = active.with_context(|ctx| ctx.switch_model(new_model.clone(), new_context_limit)).await;

        active.touch();

        Ok(ModelSwitchOutcome { previous_model, new_model, needs_compaction })
    }
}
