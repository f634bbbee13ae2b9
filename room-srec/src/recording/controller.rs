//! Per-room recording state machine.
//!
//! ```text
//! Idle --(probe: live)--> Recording --(stream ended)--> Idle
//!                         Recording --(stop)--> Stopping --(ack | grace expired)--> Idle
//! ```
//!
//! Every transition of a room runs under that room's mutex, so a room's
//! events are applied one at a time while different rooms proceed in
//! parallel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::recorder::{Recorder, RecorderError, RecordingToken};
use super::table::{RecordingEntry, RecordingTable};
use crate::domain::{RecordingState, Room};
use crate::monitor::CaptureHandle;
use crate::rooms::RoomSet;

/// Stream-ended tokens remembered while their recording is still starting.
const MAX_EARLY_ENDS: usize = 64;

/// Timeouts applied to recorder calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Bound on `Recorder::start`.
    pub start_timeout: Duration,
    /// Grace period on `Recorder::stop` before force-removal.
    pub stop_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of handing a live probe result to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The recorder accepted the capture.
    Started(RecordingToken),
    /// The recorder started and reported the stream ended before the
    /// start completed; the room is already back to idle.
    Ended(RecordingToken),
    /// Another result for the same room won the check-and-set.
    Duplicate,
    /// The room was removed while the probe was running.
    RoomGone,
    /// The recorder refused or did not answer; the room is idle again.
    StartFailed(String),
}

/// Result of a stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was recording.
    NotRecording,
    /// The recorder acknowledged the stop.
    Stopped,
    /// The recorder did not acknowledge; the entry was removed anyway.
    ForceRemoved(String),
}

/// Drives recordings from probe results and recorder events.
pub struct RecordingController {
    rooms: Arc<RoomSet>,
    table: Arc<RecordingTable>,
    recorder: Arc<dyn Recorder>,
    config: ControllerConfig,
    /// Per-room transition locks.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    /// Tokens whose end arrived before `attach_token`.
    early_ends: Mutex<VecDeque<RecordingToken>>,
}

impl RecordingController {
    pub fn new(
        rooms: Arc<RoomSet>,
        table: Arc<RecordingTable>,
        recorder: Arc<dyn Recorder>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            rooms,
            table,
            recorder,
            config,
            locks: DashMap::new(),
            early_ends: Mutex::new(VecDeque::new()),
        }
    }

    pub fn table(&self) -> &Arc<RecordingTable> {
        &self.table
    }

    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    fn room_lock(&self, room_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(room_id.to_string()).or_default().clone()
    }

    /// Current state of a room.
    pub fn state(&self, room_id: &str) -> RecordingState {
        self.table
            .get(room_id)
            .map(|entry| entry.state)
            .unwrap_or(RecordingState::Idle)
    }

    /// `Idle --(probe: live)--> Recording`.
    pub async fn on_live(&self, room_id: &str, capture: CaptureHandle) -> StartOutcome {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;

        let Some(room) = self.rooms.get(room_id) else {
            debug!(room_id = %room_id, "Room removed before its live result was applied");
            return StartOutcome::RoomGone;
        };

        if !self.table.try_insert(room_id, capture.clone()) {
            debug!(room_id = %room_id, "Duplicate recording attempt discarded");
            return StartOutcome::Duplicate;
        }

        let start = self.recorder.start(&capture, room.record_side_channel);
        let token = match tokio::time::timeout(self.config.start_timeout, start).await {
            Ok(Ok(token)) => token,
            Ok(Err(e)) => {
                self.table.remove(room_id);
                warn!(room_id = %room_id, error = %e, "Recorder failed to start");
                return StartOutcome::StartFailed(e.to_string());
            }
            Err(_) => {
                self.table.remove(room_id);
                let e = RecorderError::Timeout(self.config.start_timeout);
                warn!(room_id = %room_id, error = %e, "Recorder failed to start");
                return StartOutcome::StartFailed(e.to_string());
            }
        };

        let ended_early = {
            let mut early = self.early_ends.lock();
            self.table.attach_token(room_id, token.clone());
            match early.iter().position(|t| t == &token) {
                Some(pos) => {
                    early.remove(pos);
                    true
                }
                None => false,
            }
        };

        if ended_early {
            self.table.remove(room_id);
            info!(room_id = %room_id, token = %token, "Stream ended while the recording was starting");
            return StartOutcome::Ended(token);
        }

        info!(
            room = %room,
            token = %token,
            side_channel = room.record_side_channel,
            "Recording started"
        );
        StartOutcome::Started(token)
    }

    /// `Recording --(stream ended)--> Idle`.
    ///
    /// Returns the room that became idle, if any.
    pub async fn on_stream_ended(&self, token: &RecordingToken) -> Option<String> {
        let room_id = {
            let mut early = self.early_ends.lock();
            match self.table.find_by_token(token) {
                Some(room_id) => room_id,
                None => {
                    debug!(token = %token, "Stream end for an unknown recording");
                    early.push_back(token.clone());
                    if early.len() > MAX_EARLY_ENDS {
                        early.pop_front();
                    }
                    return None;
                }
            }
        };

        let lock = self.room_lock(&room_id);
        let _guard = lock.lock().await;

        match self.table.get(&room_id) {
            Some(RecordingEntry {
                token: Some(current),
                state: RecordingState::Recording,
                ..
            }) if &current == token => {
                self.table.remove(&room_id);
                info!(room_id = %room_id, token = %token, "Stream ended, recording finished");
                Some(room_id)
            }
            _ => {
                debug!(room_id = %room_id, token = %token, "Stream end already handled");
                None
            }
        }
    }

    /// `Recording --(stop)--> Stopping --> Idle`.
    ///
    /// Stopping an idle room is a no-op.
    pub async fn stop(&self, room_id: &str) -> StopOutcome {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;
        self.stop_locked(room_id).await
    }

    /// Stop any recording of the room, then purge it from the room set.
    ///
    /// Both happen under the room's lock, so a live result still in flight
    /// either lands before the stop or finds the room gone.
    pub async fn retire(&self, room_id: &str) -> (StopOutcome, Option<Room>) {
        let lock = self.room_lock(room_id);
        let _guard = lock.lock().await;
        let outcome = self.stop_locked(room_id).await;
        let room = self.rooms.remove(room_id);
        self.locks.remove(room_id);
        (outcome, room)
    }

    async fn stop_locked(&self, room_id: &str) -> StopOutcome {
        let Some(entry) = self.table.get(room_id) else {
            return StopOutcome::NotRecording;
        };
        if let Err(e) = self.table.transition(room_id, RecordingState::Stopping) {
            warn!(room_id = %room_id, error = %e, "Unexpected recording state on stop");
        }

        let Some(token) = entry.token else {
            self.table.remove(room_id);
            return StopOutcome::Stopped;
        };

        info!(room_id = %room_id, token = %token, "Stopping recording");
        let grace = self.config.stop_timeout;
        let result = match tokio::time::timeout(grace, self.recorder.stop(&token, grace)).await {
            Ok(result) => result,
            Err(_) => Err(RecorderError::Timeout(grace)),
        };
        self.table.remove(room_id);

        match result {
            Ok(()) => {
                info!(room_id = %room_id, "Recording stopped");
                StopOutcome::Stopped
            }
            Err(RecorderError::UnknownToken(_)) => {
                debug!(room_id = %room_id, "Recorder had already finished");
                StopOutcome::Stopped
            }
            Err(e) => {
                warn!(room_id = %room_id, error = %e, "Recorder unresponsive on stop, entry removed");
                StopOutcome::ForceRemoved(e.to_string())
            }
        }
    }

    /// Recordings the table holds as running that the recorder no longer
    /// knows about, e.g. after their stream-end events were dropped.
    pub fn stale_recordings(&self) -> Vec<(String, RecordingToken)> {
        self.table
            .list()
            .into_iter()
            .filter(|entry| entry.state == RecordingState::Recording)
            .filter_map(|entry| entry.token.map(|token| (entry.room_id, token)))
            .filter(|(_, token)| !self.recorder.is_active(token))
            .collect()
    }

    /// Stop every active recording concurrently.
    pub async fn stop_all(&self) -> Vec<(String, StopOutcome)> {
        let room_ids: Vec<String> = self.table.list().into_iter().map(|e| e.room_id).collect();
        let outcomes = futures::future::join_all(room_ids.iter().map(|id| self.stop(id))).await;
        self.early_ends.lock().clear();
        room_ids.into_iter().zip(outcomes).collect()
    }
}
