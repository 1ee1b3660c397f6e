//! In-process fan-out of typed runtime events to subscribers.
//!
//! This is the synchronous bus the rest of the runtime narrates itself over —
//! distinct from the durable, session-scoped log in [`crate::event_log`].
//! A listener failing (panicking) must never prevent delivery to the others;
//! each listener runs behind `catch_unwind` and a panic is logged, not
//! propagated.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use tron_domain::event::FailureCategory;
use tron_domain::session::{CompactionResult, ContextSnapshot};
use tron_domain::tool::{Message, ToolCall, Usage};

/// Every event variant the core runtime narrates over the bus. All carry
/// `session_id` and `timestamp` so a listener can reconstruct ordering
/// without a back-reference to the emitter.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CoreEvent {
    TurnStart { session_id: String, timestamp: DateTime<Utc>, turn: u32 },
    TurnEnd { session_id: String, timestamp: DateTime<Utc>, duration_ms: u64, cost: f64, token_usage: Usage, context_limit: u32 },
    AgentEnd { session_id: String, timestamp: DateTime<Utc> },
    AgentInterrupted { session_id: String, timestamp: DateTime<Utc>, partial_content: String },
    MessageUpdate { session_id: String, timestamp: DateTime<Utc>, content: String },
    ThinkingStart { session_id: String, timestamp: DateTime<Utc> },
    ThinkingDelta { session_id: String, timestamp: DateTime<Utc>, delta: String },
    ThinkingEnd { session_id: String, timestamp: DateTime<Utc>, thinking: String },
    TextStart { session_id: String, timestamp: DateTime<Utc> },
    TextEnd { session_id: String, timestamp: DateTime<Utc>, text: String },
    ToolUseBatch { session_id: String, timestamp: DateTime<Utc>, tool_calls: Vec<ToolCall> },
    ToolExecutionStart { session_id: String, timestamp: DateTime<Utc>, tool_call_id: String, tool_name: String, arguments: serde_json::Value },
    ToolExecutionUpdate { session_id: String, timestamp: DateTime<Utc>, tool_call_id: String, update: String },
    ToolExecutionEnd { session_id: String, timestamp: DateTime<Utc>, tool_call_id: String, duration_ms: u64, is_error: bool, result: String },
    HookTriggered { session_id: String, timestamp: DateTime<Utc>, hook_event: String, hook_names: Vec<String> },
    HookCompleted { session_id: String, timestamp: DateTime<Utc>, hook_event: String },
    ResponseComplete { session_id: String, timestamp: DateTime<Utc>, has_tool_calls: bool, input_tokens: u32, output_tokens: u32 },
    ApiRetry { session_id: String, timestamp: DateTime<Utc>, attempt: u32, max: u32, delay_ms: u64 },
    CompactionStart { session_id: String, timestamp: DateTime<Utc>, reason: String },
    CompactionComplete { session_id: String, timestamp: DateTime<Utc>, result: CompactionResult },
    TodosUpdated { session_id: String, timestamp: DateTime<Utc>, items: Vec<String> },
    AgentTurnFailed { session_id: String, timestamp: DateTime<Utc>, category: FailureCategory, message: String, recoverable: bool },
    ContextSnapshotTaken { session_id: String, timestamp: DateTime<Utc>, snapshot: ContextSnapshot },
    MessageAppended { session_id: String, timestamp: DateTime<Utc>, message: Message },
    SubagentSpawned { session_id: String, timestamp: DateTime<Utc>, child_session_id: String, spawn_type: String },
    SubagentCompleted { session_id: String, timestamp: DateTime<Utc>, child_session_id: String, success: bool },
}

impl CoreEvent {
    pub fn session_id(&self) -> &str {
        match self {
            CoreEvent::TurnStart { session_id, .. }
            | CoreEvent::TurnEnd { session_id, .. }
            | CoreEvent::AgentEnd { session_id, .. }
            | CoreEvent::AgentInterrupted { session_id, .. }
            | CoreEvent::MessageUpdate { session_id, .. }
            | CoreEvent::ThinkingStart { session_id, .. }
            | CoreEvent::ThinkingDelta { session_id, .. }
            | CoreEvent::ThinkingEnd { session_id, .. }
            | CoreEvent::TextStart { session_id, .. }
            | CoreEvent::TextEnd { session_id, .. }
            | CoreEvent::ToolUseBatch { session_id, .. }
            | CoreEvent::ToolExecutionStart { session_id, .. }
            | CoreEvent::ToolExecutionUpdate { session_id, .. }
            | CoreEvent::ToolExecutionEnd { session_id, .. }
            | CoreEvent::HookTriggered { session_id, .. }
            | CoreEvent::HookCompleted { session_id, .. }
            | CoreEvent::ResponseComplete { session_id, .. }
            | CoreEvent::ApiRetry { session_id, .. }
            | CoreEvent::CompactionStart { session_id, .. }
            | CoreEvent::CompactionComplete { session_id, .. }
            | CoreEvent::TodosUpdated { session_id, .. }
            | CoreEvent::AgentTurnFailed { session_id, .. }
            | CoreEvent::ContextSnapshotTaken { session_id, .. }
            | CoreEvent::MessageAppended { session_id, .. }
            | CoreEvent::SubagentSpawned { session_id, .. }
            | CoreEvent::SubagentCompleted { session_id, .. } => session_id,
        }
    }
}

type BoxedListener = Arc<dyn Fn(&CoreEvent) + Send + Sync>;

/// A registered listener's handle, used to remove it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Entry {
    id: ListenerId,
    listener: BoxedListener,
}

/// Synchronous fan-out bus. `emit` delivers to every listener in
/// registration order before returning; a listener observing event A
/// completes before event B starts, for any single emitter thread.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener, returning an id usable with [`Self::remove`].
    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CoreEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Entry {
            id,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a previously-registered listener. Returns `true` if it existed.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|e| e.id != id);
        listeners.len() != before
    }

    /// Deliver `event` to every registered listener, in registration order.
    /// A listener that panics is caught and logged; delivery continues.
    pub fn emit(&self, event: CoreEvent) {
        let snapshot: Vec<BoxedListener> = self
            .listeners
            .read()
            .iter()
            .map(|e| e.listener.clone())
            .collect();

        for listener in snapshot {
            let event_ref = &event;
            let result = catch_unwind(AssertUnwindSafe(|| listener(event_ref)));
            if result.is_err() {
                tracing::error!(
                    session_id = event.session_id(),
                    event = ?event,
                    "event listener panicked; isolated from other listeners"
                );
            }
        }
    }

    pub fn count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(session_id: &str) -> CoreEvent {
        CoreEvent::TurnStart {
            session_id: session_id.into(),
            timestamp: Utc::now(),
            turn: 1,
        }
    }

    #[test]
    fn delivers_to_all_listeners_in_registration_order() {
        let bus = EventEmitter::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let o1 = order.clone();
        bus.add(move |_| o1.lock().push(1));
        let o2 = order.clone();
        bus.add(move |_| o2.lock().push(2));

        bus.emit(event("s1"));
        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn one_listener_panicking_does_not_block_others() {
        let bus = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        bus.add(|_| panic!("boom"));
        let h = hits.clone();
        bus.add(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(event("s1"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_stops_future_delivery() {
        let bus = EventEmitter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = bus.add(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(event("s1"));
        assert!(bus.remove(id));
        bus.emit(event("s1"));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!bus.remove(id));
    }

    #[test]
    fn count_and_clear() {
        let bus = EventEmitter::new();
        bus.add(|_| {});
        bus.add(|_| {});
        assert_eq!(bus.count(), 2);
        bus.clear();
        assert_eq!(bus.count(), 0);
    }

    #[test]
    fn session_id_accessor_covers_variant() {
        let e = event("abc");
        assert_eq!(e.session_id(), "abc");
    }
}
