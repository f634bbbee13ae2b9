//! Active recording table.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use super::recorder::RecordingToken;
use crate::domain::RecordingState;
use crate::monitor::CaptureHandle;
use crate::{Error, Result};

/// A room that is currently being captured.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingEntry {
    pub room_id: String,
    /// What the recorder was asked to capture.
    pub capture: CaptureHandle,
    /// Recorder token. `None` while `Recorder::start` is still running.
    pub token: Option<RecordingToken>,
    /// `Recording` or `Stopping`.
    pub state: RecordingState,
    pub started_at: DateTime<Utc>,
}

/// Table of active recordings, at most one per room.
///
/// [`RecordingTable::try_insert`] is the only duplicate-prevention
/// primitive; callers compose around it instead of checking membership
/// first.
#[derive(Debug, Default)]
pub struct RecordingTable {
    entries: DashMap<String, RecordingEntry>,
}

impl RecordingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim `room_id`.
    ///
    /// Returns `false` if the room already has an entry.
    pub fn try_insert(&self, room_id: &str, capture: CaptureHandle) -> bool {
        match self.entries.entry(room_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(RecordingEntry {
                    room_id: room_id.to_string(),
                    capture,
                    token: None,
                    state: RecordingState::Recording,
                    started_at: Utc::now(),
                });
                true
            }
        }
    }

    /// Record the recorder token once the recorder has started.
    pub fn attach_token(&self, room_id: &str, token: RecordingToken) -> bool {
        match self.entries.get_mut(room_id) {
            Some(mut entry) => {
                entry.token = Some(token);
                true
            }
            None => false,
        }
    }

    /// Move an existing entry to `target`, returning its previous state.
    ///
    /// Fails when the room has no entry or the transition is not allowed.
    pub fn transition(&self, room_id: &str, target: RecordingState) -> Result<RecordingState> {
        let mut entry = self
            .entries
            .get_mut(room_id)
            .ok_or_else(|| Error::not_found("Recording", room_id))?;
        let previous = entry.state;
        entry.state = previous.transition_to(target)?;
        Ok(previous)
    }

    pub fn remove(&self, room_id: &str) -> Option<RecordingEntry> {
        self.entries.remove(room_id).map(|(_, entry)| entry)
    }

    pub fn get(&self, room_id: &str) -> Option<RecordingEntry> {
        self.entries.get(room_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.entries.contains_key(room_id)
    }

    /// Find the room owning a recorder token.
    pub fn find_by_token(&self, token: &RecordingToken) -> Option<String> {
        self.entries
            .iter()
            .find(|entry| entry.token.as_ref() == Some(token))
            .map(|entry| entry.key().clone())
    }

    /// Snapshot of all entries ordered by start time.
    pub fn list(&self) -> Vec<RecordingEntry> {
        let mut entries: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.room_id.cmp(&b.room_id))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn capture() -> CaptureHandle {
        CaptureHandle::new("http://cdn/live.flv")
    }

    #[test]
    fn test_try_insert_once() {
        let table = RecordingTable::new();
        assert!(table.try_insert("1", capture()));
        assert!(!table.try_insert("1", capture()));
        assert_eq!(table.len(), 1);

        let entry = table.get("1").unwrap();
        assert_eq!(entry.state, RecordingState::Recording);
        assert!(entry.token.is_none());
    }

    #[test]
    fn test_try_insert_concurrent() {
        let table = Arc::new(RecordingTable::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let table = table.clone();
                let wins = wins.clone();
                std::thread::spawn(move || {
                    if table.try_insert("room", capture()) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_token_lookup_and_remove() {
        let table = RecordingTable::new();
        table.try_insert("1", capture());
        table.try_insert("2", capture());

        let token = RecordingToken::new("tok");
        assert!(table.attach_token("2", token.clone()));
        assert!(!table.attach_token("3", token.clone()));

        assert_eq!(table.find_by_token(&token).as_deref(), Some("2"));
        assert!(table.find_by_token(&RecordingToken::new("other")).is_none());

        assert_eq!(
            table.transition("2", RecordingState::Stopping).unwrap(),
            RecordingState::Recording
        );
        assert_eq!(table.get("2").unwrap().state, RecordingState::Stopping);

        assert!(table.remove("2").is_some());
        assert!(table.remove("2").is_none());
        assert!(!table.contains("2"));
    }

    #[test]
    fn test_transition_rejects_invalid_moves() {
        let table = RecordingTable::new();
        assert!(matches!(
            table.transition("1", RecordingState::Stopping),
            Err(Error::NotFound { .. })
        ));

        table.try_insert("1", capture());
        table.transition("1", RecordingState::Stopping).unwrap();
        assert!(matches!(
            table.transition("1", RecordingState::Recording),
            Err(Error::Validation(_))
        ));
        assert!(table.transition("1", RecordingState::Stopping).is_err());
        assert_eq!(table.get("1").unwrap().state, RecordingState::Stopping);
    }

    #[test]
    fn test_list_is_snapshot() {
        let table = RecordingTable::new();
        table.try_insert("a", capture());
        table.try_insert("b", capture());

        let snapshot = table.list();
        table.remove("a");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(table.list().len(), 1);
    }
}
