//! Probe contract and result types.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Describes how to capture a live room.
///
/// Produced by the probe and handed to the recorder unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureHandle {
    /// Stream URL.
    pub url: String,
    /// Stream title, if the probe reported one.
    pub title: Option<String>,
}

impl CaptureHandle {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Live status of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveStatus {
    /// The room is live and can be captured.
    Live(CaptureHandle),
    /// The room is offline.
    Offline,
}

impl LiveStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, LiveStatus::Live(_))
    }
}

/// Probe failure.
///
/// All variants are transient from the scheduler's point of view: the room
/// stays unknown and is retried at its next due time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe failed: {0}")]
    Failed(String),
}

impl ProbeError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Checks whether a room is currently live.
#[async_trait]
pub trait StreamProbe: Send + Sync + 'static {
    /// Check a room.
    ///
    /// `timeout` is advisory for implementations; callers enforce it
    /// regardless.
    async fn check(
        &self,
        room_id: &str,
        secondary_id: Option<&str>,
        timeout: Duration,
    ) -> Result<LiveStatus, ProbeError>;
}
