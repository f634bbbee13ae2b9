//! Bounded worker pool executing probe tasks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schedule::ProbeScheduler;
use super::task::ProbeTask;
use crate::config::SchedulerConfig;
use crate::monitor::{LiveStatus, ProbeError, StreamProbe};
use crate::recording::{RecordingController, StartOutcome};
use crate::rooms::RoomSet;

/// Configuration for a worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum concurrent probes.
    pub max_workers: usize,
    /// Timeout applied to every probe call.
    pub probe_timeout: Duration,
    /// Pause a worker takes after each probe.
    pub check_wait: Duration,
    /// Idle workers re-check the queue at least this often.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            probe_timeout: Duration::from_secs(10),
            check_wait: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl From<&SchedulerConfig> for WorkerPoolConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            probe_timeout: config.probe_timeout,
            check_wait: config.check_wait,
            ..Default::default()
        }
    }
}

/// FIFO queue of pending probe tasks.
#[derive(Debug, Default)]
pub struct ProbeQueue {
    tasks: Mutex<VecDeque<ProbeTask>>,
    notify: Notify,
}

impl ProbeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: ProbeTask) {
        self.tasks.lock().push_back(task);
        self.notify.notify_one();
    }

    pub fn push_all(&self, tasks: impl IntoIterator<Item = ProbeTask>) {
        let mut queue = self.tasks.lock();
        let before = queue.len();
        queue.extend(tasks);
        for _ in before..queue.len() {
            self.notify.notify_one();
        }
    }

    pub fn pop(&self) -> Option<ProbeTask> {
        self.tasks.lock().pop_front()
    }

    /// Remove every pending task.
    pub fn drain(&self) -> Vec<ProbeTask> {
        self.tasks.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

/// What a probe task ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The room no longer exists.
    Skipped,
    /// The task was cancelled before its result was applied.
    Cancelled,
    Offline,
    /// Live; carries what the controller did with it.
    Live(StartOutcome),
    /// Transient failure, retried at the next due time.
    Failed(ProbeError),
}

/// Collaborators a worker needs to run a task.
#[derive(Clone)]
pub struct ProbeContext {
    pub rooms: Arc<RoomSet>,
    pub probe: Arc<dyn StreamProbe>,
    pub controller: Arc<RecordingController>,
    pub schedule: Arc<ProbeScheduler>,
}

impl ProbeContext {
    /// Run one task and mark it complete in the schedule.
    pub async fn execute(&self, task: &ProbeTask, timeout: Duration) -> ProbeOutcome {
        let outcome = self.execute_inner(task, timeout).await;
        self.schedule.complete(task);
        outcome
    }

    async fn execute_inner(&self, task: &ProbeTask, timeout: Duration) -> ProbeOutcome {
        if task.is_cancelled() {
            return ProbeOutcome::Cancelled;
        }
        let Some(room) = self.rooms.get(&task.room_id) else {
            debug!(room_id = %task.room_id, "Room removed before probe, skipping");
            return ProbeOutcome::Skipped;
        };

        self.schedule.mark_probed(task, Instant::now());
        let check = self
            .probe
            .check(&room.room_id, room.secondary_id.as_deref(), timeout);
        let result = tokio::select! {
            biased;
            _ = task.cancellation_token.cancelled() => return ProbeOutcome::Cancelled,
            result = tokio::time::timeout(timeout, check) => {
                result.unwrap_or(Err(ProbeError::Timeout(timeout)))
            }
        };

        match result {
            Ok(LiveStatus::Live(capture)) => {
                if task.is_cancelled() {
                    return ProbeOutcome::Cancelled;
                }
                info!(room = %room, url = %capture.url, "Room is live");
                ProbeOutcome::Live(self.controller.on_live(&room.room_id, capture).await)
            }
            Ok(LiveStatus::Offline) => {
                debug!(room_id = %room.room_id, tier = %task.tier, "Room is offline");
                ProbeOutcome::Offline
            }
            Err(e) => {
                warn!(
                    room_id = %room.room_id,
                    tier = %task.tier,
                    error = %e,
                    "Probe failed, retrying at next due time"
                );
                ProbeOutcome::Failed(e)
            }
        }
    }
}

/// A worker pool for running probe tasks.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<ProbeQueue>,
    /// Workers currently running a task.
    active_workers: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            config,
            queue: Arc::new(ProbeQueue::new()),
            active_workers: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::new(Some(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<ProbeQueue> {
        &self.queue
    }

    /// Queue tasks behind anything already pending.
    pub fn enqueue(&self, tasks: Vec<ProbeTask>) {
        self.queue.push_all(tasks);
    }

    /// Start the workers.
    pub fn start(&self, ctx: ProbeContext) {
        info!("Starting probe worker pool with {} workers", self.config.max_workers);

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool already stopped, not starting");
            return;
        };

        for i in 0..self.config.max_workers {
            let ctx = ctx.clone();
            let queue = self.queue.clone();
            let active = self.active_workers.clone();
            let cancellation_token = self.cancellation_token.clone();
            let config = self.config.clone();

            join_set.spawn(async move {
                debug!("Probe worker {} started", i);

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    let Some(task) = queue.pop() else {
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = queue.notify.notified() => {}
                            _ = tokio::time::sleep(config.poll_interval) => {}
                        }
                        continue;
                    };

                    active.fetch_add(1, Ordering::SeqCst);
                    let outcome = ctx.execute(&task, config.probe_timeout).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    debug!(
                        room_id = %task.room_id,
                        waited = ?task.waited(),
                        ?outcome,
                        "Probe task finished"
                    );

                    if !config.check_wait.is_zero() {
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = tokio::time::sleep(config.check_wait) => {}
                        }
                    }
                }

                debug!("Probe worker {} shutting down", i);
            });
        }
    }

    /// Stop the workers and discard pending tasks.
    pub async fn stop(&self) {
        info!("Stopping probe worker pool");
        self.cancellation_token.cancel();

        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        let dropped = self.queue.drain();
        if !dropped.is_empty() {
            debug!("Discarded {} pending probe tasks", dropped.len());
        }
        info!("Probe worker pool stopped");
    }

    /// Number of workers currently running a task.
    pub fn active_count(&self) -> usize {
        self.active_workers.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}
