//! Probe task definitions.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::Tier;

/// One scheduled liveness probe.
///
/// Created by the [`ProbeScheduler`](super::ProbeScheduler) for a due room
/// and consumed exactly once by the worker pool.
#[derive(Debug, Clone)]
pub struct ProbeTask {
    /// Dispatch sequence number, unique per scheduler.
    pub id: u64,
    /// Room to probe.
    pub room_id: String,
    /// Tier the room was scheduled under.
    pub tier: Tier,
    /// When the task was created.
    pub enqueued_at: Instant,
    /// Cancelled when the room is removed or the scheduler shuts down.
    pub cancellation_token: CancellationToken,
}

impl ProbeTask {
    pub fn new(
        id: u64,
        room_id: impl Into<String>,
        tier: Tier,
        enqueued_at: Instant,
        parent_token: &CancellationToken,
    ) -> Self {
        Self {
            id,
            room_id: room_id.into(),
            tier,
            enqueued_at,
            cancellation_token: parent_token.child_token(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Time spent waiting since the task was created.
    pub fn waited(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}
