//! Recorder contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::monitor::CaptureHandle;

/// Capacity of recorder event channels.
pub const RECORDER_EVENT_CAPACITY: usize = 256;

/// Opaque token identifying one recording, issued by the recorder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordingToken(String);

impl RecordingToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// A fresh random token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asynchronous notifications from the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecorderEvent {
    /// The stream ended on its own (not through `stop`).
    StreamEnded(RecordingToken),
}

/// Recorder failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecorderError {
    #[error("failed to start recording: {0}")]
    StartFailed(String),

    #[error("failed to stop recording: {0}")]
    StopFailed(String),

    #[error("unknown recording token: {0}")]
    UnknownToken(RecordingToken),

    #[error("recorder did not respond within {0:?}")]
    Timeout(Duration),
}

/// Performs the actual media capture.
#[async_trait]
pub trait Recorder: Send + Sync + 'static {
    /// Start capturing.
    async fn start(
        &self,
        capture: &CaptureHandle,
        record_side_channel: bool,
    ) -> Result<RecordingToken, RecorderError>;

    /// Stop a recording and wait for acknowledgement, at most `timeout`.
    async fn stop(&self, token: &RecordingToken, timeout: Duration) -> Result<(), RecorderError>;

    /// Whether the recording behind `token` is still running.
    fn is_active(&self, token: &RecordingToken) -> bool;

    /// Subscribe to recorder events.
    fn subscribe(&self) -> broadcast::Receiver<RecorderEvent>;
}
