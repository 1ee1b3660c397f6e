//! Durable, append-only event log. Every session's history lives here as a
//! chain of [`Event`] records linked by `parent_id`, with a gapless
//! `sequence` assigned at append time.
//!
//! Storage follows the teacher's JSONL-append idiom (one record per line,
//! `OpenOptions::append`, never rewritten in place) generalized from a flat
//! transcript line to the richer `Event` envelope, and from a single global
//! file to one file per session so per-session reads don't scan the world.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use tron_domain::error::{Error, Result};
use tron_domain::event::{Event, EventPayload};

/// Storage contract a session's event chain is durably persisted through.
/// [`EventLog`] is this crate's JSONL-backed reference implementation,
/// sufficient for tests and single-node local use; a production deployment
/// backed by a real embedded store (full-text/vector indices, etc.) is a
/// second implementation of this same trait, not a fork of this one.
pub trait DurableLog: Send + Sync {
    fn append(&self, session_id: &str, workspace_id: &str, payload: EventPayload) -> Result<Event>;
    fn append_forked_root(&self, session_id: &str, workspace_id: &str, fork_from_event_id: Uuid, forked_from_session_id: String) -> Result<Event>;
    fn delete_message(&self, session_id: &str, workspace_id: &str, target_event_id: Uuid) -> Result<Event>;
    fn get_events(&self, session_id: &str) -> Result<Vec<Event>>;
    fn get_events_at(&self, session_id: &str, at_event: Uuid) -> Result<Vec<Event>>;
    fn get_ancestors(&self, session_id: &str, event_id: Uuid) -> Result<Vec<Event>>;
    fn get_messages(&self, session_id: &str, at_event: Option<Uuid>) -> Result<Vec<tron_domain::tool::Message>>;
    fn search(&self, session_id: &str, query: &str) -> Result<Vec<Event>>;
    fn list_sessions(&self) -> Result<Vec<String>>;
    fn flush(&self, session_id: &str) -> Result<()>;
}

/// Appends events to one JSONL file per session and keeps an in-memory index
/// for fast lookups. Writes for a *single* session are not internally
/// serialized here — that guarantee is the Session Controller's
/// linearization chain (`tron_core::session`), which owns the only mutable
/// access path for an active session.
pub struct EventLog {
    base_dir: PathBuf,
    index: RwLock<HashMap<String, Vec<Event>>>,
}

impl EventLog {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            index: RwLock::new(HashMap::new()),
        }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    /// Load a session's events from disk into the in-memory index, if not
    /// already loaded. Idempotent.
    fn ensure_loaded(&self, session_id: &str) -> Result<()> {
        if self.index.read().contains_key(session_id) {
            return Ok(());
        }
        let path = self.session_path(session_id);
        let mut events = Vec::new();
        if path.exists() {
            let file = std::fs::File::open(&path)?;
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let event: Event = serde_json::from_str(&line)?;
                events.push(event);
            }
        }
        self.index.write().insert(session_id.to_string(), events);
        Ok(())
    }

    /// Directly append `payload` as a new event. Assigns `sequence` as one
    /// past the current head's, and `parent_id` as the current head's id.
    /// Callers needing linearization across concurrent appends must not
    /// call this directly — use the Session Controller's `runInChain`
    /// equivalent instead. For an inactive session with no contending
    /// writers, this direct path is safe on its own.
    pub fn append(&self, session_id: &str, workspace_id: &str, payload: EventPayload) -> Result<Event> {
        self.ensure_loaded(session_id)?;

        let mut index = self.index.write();
        let events = index.entry(session_id.to_string()).or_default();
        let (parent_id, sequence) = match events.last() {
            Some(head) => (Some(head.id), head.sequence + 1),
            None => (None, 0),
        };

        let event = Event {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            workspace_id: workspace_id.to_string(),
            parent_id,
            sequence,
            timestamp: Utc::now(),
            payload,
        };

        self.persist(&event)?;
        events.push(event.clone());
        Ok(event)
    }

    /// Append a `message.deleted` tombstone for `target_event_id`. The
    /// target is never removed from the log — only marked.
    pub fn delete_message(&self, session_id: &str, workspace_id: &str, target_event_id: Uuid) -> Result<Event> {
        self.append(session_id, workspace_id, EventPayload::MessageDeleted { target_event_id })
    }

    /// Appends a forked session's synthetic root event. Unlike a normal
    /// append, `parent_id` points into *another* session's chain (the fork
    /// point), not this session's own head — so this bypasses the usual
    /// parent/sequence derivation and requires `session_id` to have no
    /// events yet.
    pub fn append_forked_root(&self, session_id: &str, workspace_id: &str, fork_from_event_id: Uuid, forked_from_session_id: String) -> Result<Event> {
        self.ensure_loaded(session_id)?;

        let mut index = self.index.write();
        let events = index.entry(session_id.to_string()).or_default();
        if !events.is_empty() {
            return Err(Error::Other(format!("session {session_id} already has events; cannot append a forked root")));
        }

        let event = Event {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            workspace_id: workspace_id.to_string(),
            parent_id: Some(fork_from_event_id),
            sequence: 0,
            timestamp: Utc::now(),
            payload: EventPayload::SessionForked { forked_from_session_id },
        };

        self.persist(&event)?;
        events.push(event.clone());
        Ok(event)
    }

    fn persist(&self, event: &Event) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        let path = self.session_path(&event.session_id);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn get_events(&self, session_id: &str) -> Result<Vec<Event>> {
        self.ensure_loaded(session_id)?;
        Ok(self.index.read().get(session_id).cloned().unwrap_or_default())
    }

    /// All events up to and including `at_event`, by sequence — the state of
    /// the chain at that point in time.
    pub fn get_events_at(&self, session_id: &str, at_event: Uuid) -> Result<Vec<Event>> {
        let events = self.get_events(session_id)?;
        match events.iter().position(|e| e.id == at_event) {
            Some(idx) => Ok(events[..=idx].to_vec()),
            None => Err(Error::Other(format!("event {at_event} not found in session {session_id}"))),
        }
    }

    /// Walk `parent_id` back from `event_id` to the root, oldest first.
    pub fn get_ancestors(&self, session_id: &str, event_id: Uuid) -> Result<Vec<Event>> {
        let events = self.get_events(session_id)?;
        let by_id: HashMap<Uuid, &Event> = events.iter().map(|e| (e.id, e)).collect();
        let mut chain = Vec::new();
        let mut cursor = Some(event_id);
        while let Some(id) = cursor {
            let event = *by_id.get(&id).ok_or_else(|| Error::Other(format!("event {id} not found")))?;
            chain.push(event.clone());
            cursor = event.parent_id;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Reconstruct the message history visible at `at_event` (or the full
    /// chain, if `None`): user/assistant messages, tombstones applied.
    pub fn get_messages(&self, session_id: &str, at_event: Option<Uuid>) -> Result<Vec<tron_domain::tool::Message>> {
        let events = match at_event {
            Some(id) => self.get_events_at(session_id, id)?,
            None => self.get_events(session_id)?,
        };
        let mut deleted = std::collections::HashSet::new();
        for event in &events {
            if let EventPayload::MessageDeleted { target_event_id } = &event.payload {
                deleted.insert(*target_event_id);
            }
        }
        let mut messages = Vec::new();
        for event in &events {
            if deleted.contains(&event.id) {
                continue;
            }
            match &event.payload {
                EventPayload::MessageUser { message } | EventPayload::MessageAssistant { message } => {
                    messages.push(message.clone());
                }
                _ => {}
            }
        }
        Ok(messages)
    }

    /// Case-insensitive substring search over message text, newest first.
    pub fn search(&self, session_id: &str, query: &str) -> Result<Vec<Event>> {
        let events = self.get_events(session_id)?;
        let needle = query.to_lowercase();
        let mut hits: Vec<Event> = events
            .into_iter()
            .filter(|e| match &e.payload {
                EventPayload::MessageUser { message } | EventPayload::MessageAssistant { message } => message
                    .content
                    .text()
                    .map(|t| t.to_lowercase().contains(&needle))
                    .unwrap_or(false),
                _ => false,
            })
            .collect();
        hits.reverse();
        Ok(hits)
    }

    pub fn list_sessions(&self) -> Result<Vec<String>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let entry = entry?;
            if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }

    /// No-op: every `append` already fsyncs the line onto disk via
    /// `OpenOptions::append`. Kept for interface symmetry with a store that
    /// batches writes.
    pub fn flush(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

impl DurableLog for EventLog {
    fn append(&self, session_id: &str, workspace_id: &str, payload: EventPayload) -> Result<Event> {
        EventLog::append(self, session_id, workspace_id, payload)
    }

    fn append_forked_root(&self, session_id: &str, workspace_id: &str, fork_from_event_id: Uuid, forked_from_session_id: String) -> Result<Event> {
        EventLog::append_forked_root(self, session_id, workspace_id, fork_from_event_id, forked_from_session_id)
    }

    fn delete_message(&self, session_id: &str, workspace_id: &str, target_event_id: Uuid) -> Result<Event> {
        EventLog::delete_message(self, session_id, workspace_id, target_event_id)
    }

    fn get_events(&self, session_id: &str) -> Result<Vec<Event>> {
        EventLog::get_events(self, session_id)
    }

    fn get_events_at(&self, session_id: &str, at_event: Uuid) -> Result<Vec<Event>> {
        EventLog::get_events_at(self, session_id, at_event)
    }

    fn get_ancestors(&self, session_id: &str, event_id: Uuid) -> Result<Vec<Event>> {
        EventLog::get_ancestors(self, session_id, event_id)
    }

    fn get_messages(&self, session_id: &str, at_event: Option<Uuid>) -> Result<Vec<tron_domain::tool::Message>> {
        EventLog::get_messages(self, session_id, at_event)
    }

    fn search(&self, session_id: &str, query: &str) -> Result<Vec<Event>> {
        EventLog::search(self, session_id, query)
    }

    fn list_sessions(&self) -> Result<Vec<String>> {
        EventLog::list_sessions(self)
    }

    fn flush(&self, session_id: &str) -> Result<()> {
        EventLog::flush(self, session_id)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tron_domain::tool::Message;

    fn log() -> (EventLog, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (EventLog::new(dir.path()), dir)
    }

    #[test]
    fn first_append_has_no_parent_and_sequence_zero() {
        let (log, _dir) = log();
        let event = log
            .append("s1", "ws1", EventPayload::MessageUser { message: Message::user("hi") })
            .unwrap();
        assert!(event.parent_id.is_none());
        assert_eq!(event.sequence, 0);
    }

    #[test]
    fn sequence_is_gapless_and_parent_chain_is_linear() {
        let (log, _dir) = log();
        let e1 = log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("a") }).unwrap();
        let e2 = log.append("s1", "ws1", EventPayload::MessageAssistant { message: Message::assistant("b") }).unwrap();
        let e3 = log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("c") }).unwrap();
        assert_eq!(e2.sequence, e1.sequence + 1);
        assert_eq!(e3.sequence, e2.sequence + 1);
        assert_eq!(e2.parent_id, Some(e1.id));
        assert_eq!(e3.parent_id, Some(e2.id));
    }

    #[test]
    fn persisted_events_survive_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let log = EventLog::new(dir.path());
            log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("hi") }).unwrap();
        }
        let reloaded = EventLog::new(dir.path());
        let events = reloaded.get_events("s1").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn deleted_message_is_excluded_from_get_messages() {
        let (log, _dir) = log();
        let e1 = log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("secret") }).unwrap();
        log.delete_message("s1", "ws1", e1.id).unwrap();
        let messages = log.get_messages("s1", None).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn get_events_at_returns_prefix_up_to_and_including_target() {
        let (log, _dir) = log();
        let e1 = log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("a") }).unwrap();
        log.append("s1", "ws1", EventPayload::MessageAssistant { message: Message::assistant("b") }).unwrap();
        let prefix = log.get_events_at("s1", e1.id).unwrap();
        assert_eq!(prefix.len(), 1);
    }

    #[test]
    fn ancestors_walk_back_to_root_oldest_first() {
        let (log, _dir) = log();
        let e1 = log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("a") }).unwrap();
        let e2 = log.append("s1", "ws1", EventPayload::MessageAssistant { message: Message::assistant("b") }).unwrap();
        let ancestors = log.get_ancestors("s1", e2.id).unwrap();
        assert_eq!(ancestors.iter().map(|e| e.id).collect::<Vec<_>>(), vec![e1.id, e2.id]);
    }

    #[test]
    fn search_is_case_insensitive_and_newest_first() {
        let (log, _dir) = log();
        log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("tell me about Rust") }).unwrap();
        log.append("s1", "ws1", EventPayload::MessageAssistant { message: Message::assistant("rust is great") }).unwrap();
        let hits = log.search("s1", "RUST").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(matches!(&hits[0].payload, EventPayload::MessageAssistant { .. }));
    }

    #[test]
    fn forked_root_parent_id_points_into_the_source_sessions_chain() {
        let (log, _dir) = log();
        let source = log.append("parent", "ws1", EventPayload::MessageUser { message: Message::user("a") }).unwrap();
        let root = log.append_forked_root("child", "ws1", source.id, "parent".to_string()).unwrap();
        assert_eq!(root.parent_id, Some(source.id));
        assert_eq!(root.sequence, 0);
        assert!(matches!(&root.payload, EventPayload::SessionForked { forked_from_session_id } if forked_from_session_id == "parent"));
    }

    #[test]
    fn forked_root_rejects_a_session_that_already_has_events() {
        let (log, _dir) = log();
        log.append("child", "ws1", EventPayload::MessageUser { message: Message::user("already here") }).unwrap();
        let err = log.append_forked_root("child", "ws1", Uuid::new_v4(), "parent".to_string()).unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn sessions_are_isolated_from_each_other() {
        let (log, _dir) = log();
        log.append("s1", "ws1", EventPayload::MessageUser { message: Message::user("a") }).unwrap();
        log.append("s2", "ws1", EventPayload::MessageUser { message: Message::user("b") }).unwrap();
        assert_eq!(log.get_events("s1").unwrap().len(), 1);
        assert_eq!(log.get_events("s2").unwrap().len(), 1);
    }
}
