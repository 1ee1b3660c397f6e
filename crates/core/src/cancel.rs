//! Per-session cancellation tokens with group fan-out.
//!
//! Every suspension point in the turn loop observes a [`CancelToken`] before
//! resuming. **Groups** implement cascading cancellation: a cancelled parent
//! turn cancels every subagent registered in its group, which is how
//! `spawn_subagent` children react to the parent's abort signal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A cancellation token observed at every suspension point of a turn.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves the instant this token is cancelled — already-cancelled
    /// resolves immediately. Lets a blocking wait race a [`Promise.race`]
    /// shape against the parent's own abort signal rather than only a
    /// timeout.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks active cancellation tokens per session id, with group support for
/// cascading parent -> subagent cancellation.
#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    /// group owner (parent session id) -> set of child session ids.
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new token for a session, replacing any prior one.
    pub fn register(&self, session_id: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(session_id.to_owned(), token.clone());
        token
    }

    /// Cancel the running turn for a session and cascade to its group.
    /// Returns `true` if a token was found for `session_id` itself.
    pub fn cancel(&self, session_id: &str) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(session_id) {
            token.cancel();
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(session_id) {
            let tokens = self.tokens.lock();
            for child_id in children {
                if let Some(child_token) = tokens.get(child_id) {
                    child_token.cancel();
                }
            }
        }

        found
    }

    /// Remove the token for a session (called when its turn completes).
    pub fn remove(&self, session_id: &str) {
        self.tokens.lock().remove(session_id);
        self.groups.lock().remove(session_id);
    }

    pub fn is_running(&self, session_id: &str) -> bool {
        self.tokens.lock().contains_key(session_id)
    }

    /// Look up the token registered for a session, if its turn is still
    /// running.
    pub fn get(&self, session_id: &str) -> Option<CancelToken> {
        self.tokens.lock().get(session_id).cloned()
    }

    /// Register a subagent session id in its parent's cancel group.
    pub fn add_to_group(&self, parent_id: &str, child_id: &str) {
        self.groups
            .lock()
            .entry(parent_id.to_owned())
            .or_default()
            .insert(child_id.to_owned());
    }

    /// Remove a subagent from its parent's cancel group.
    pub fn remove_from_group(&self, parent_id: &str, child_id: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_id) {
            children.remove(child_id);
            if children.is_empty() {
                groups.remove(parent_id);
            }
        }
    }
}
