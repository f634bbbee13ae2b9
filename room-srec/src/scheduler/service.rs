//! Scheduler service.
//!
//! Wires the clock, the probe schedule, the worker pool and the recording
//! controller together, and exposes the room membership operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::schedule::ProbeScheduler;
use super::worker_pool::{ProbeContext, ProbeQueue, WorkerPool, WorkerPoolConfig};
use crate::config::SchedulerConfig;
use crate::domain::{RecordingState, Room};
use crate::monitor::StreamProbe;
use crate::recording::{
    ControllerConfig, Recorder, RecorderEvent, RecordingController, RecordingEntry,
    RecordingTable, RecordingToken, StopOutcome,
};
use crate::registry::RoomRegistry;
use crate::rooms::RoomSet;
use crate::{Error, Result};

/// The room monitoring and recording scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    rooms: Arc<RoomSet>,
    registry: Arc<dyn RoomRegistry>,
    probe: Arc<dyn StreamProbe>,
    schedule: Arc<ProbeScheduler>,
    pool: WorkerPool,
    controller: Arc<RecordingController>,
    cancellation_token: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Option<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        rooms: Arc<RoomSet>,
        registry: Arc<dyn RoomRegistry>,
        probe: Arc<dyn StreamProbe>,
        recorder: Arc<dyn Recorder>,
    ) -> Self {
        let schedule = Arc::new(ProbeScheduler::from_config(&config));
        Self::with_schedule(config, rooms, registry, probe, recorder, schedule)
    }

    /// Create a scheduler around a preconfigured [`ProbeScheduler`].
    pub fn with_schedule(
        config: SchedulerConfig,
        rooms: Arc<RoomSet>,
        registry: Arc<dyn RoomRegistry>,
        probe: Arc<dyn StreamProbe>,
        recorder: Arc<dyn Recorder>,
        schedule: Arc<ProbeScheduler>,
    ) -> Self {
        let controller = Arc::new(RecordingController::new(
            rooms.clone(),
            Arc::new(RecordingTable::new()),
            recorder,
            ControllerConfig {
                start_timeout: config.start_timeout,
                stop_timeout: config.stop_timeout,
            },
        ));

        Self {
            pool: WorkerPool::new(WorkerPoolConfig::from(&config)),
            config,
            rooms,
            registry,
            probe,
            schedule,
            controller,
            cancellation_token: CancellationToken::new(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Some(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn schedule(&self) -> &Arc<ProbeScheduler> {
        &self.schedule
    }

    pub fn controller(&self) -> &Arc<RecordingController> {
        &self.controller
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancellation_token.is_cancelled()
    }

    /// Start the clock, the workers and the recorder event loop.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already started");
            return;
        }
        if self.cancellation_token.is_cancelled() {
            warn!("Scheduler already shut down, not starting");
            return;
        }

        info!(
            rooms = self.rooms.len(),
            workers = self.config.max_workers,
            normal = ?self.config.normal,
            important = ?self.config.important,
            "Starting scheduler"
        );

        self.pool.start(ProbeContext {
            rooms: self.rooms.clone(),
            probe: self.probe.clone(),
            controller: self.controller.clone(),
            schedule: self.schedule.clone(),
        });

        // Subscribe before spawning so no event is missed.
        let events = self.controller.recorder().subscribe();

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return;
        };
        join_set.spawn(run_clock(
            self.config.tick_interval,
            self.rooms.clone(),
            self.schedule.clone(),
            self.controller.clone(),
            self.pool.queue().clone(),
            self.cancellation_token.clone(),
        ));
        join_set.spawn(run_recorder_events(
            events,
            self.rooms.clone(),
            self.schedule.clone(),
            self.controller.clone(),
            self.cancellation_token.clone(),
        ));
    }

    /// Register a new room. It is due for probing immediately.
    pub async fn add_room(&self, room: Room) -> Result<()> {
        if self.rooms.contains(&room.room_id) {
            return Err(Error::DuplicateRoom(room.room_id));
        }
        self.registry.add(&room).await?;
        self.rooms.insert(room.clone())?;
        info!(room = %room, tier = %room.tier(), "Room added");
        Ok(())
    }

    /// Remove a room, stopping its recording first.
    pub async fn remove_room(&self, room_id: &str) -> Result<Room> {
        if !self.rooms.contains(room_id) {
            return Err(Error::not_found("Room", room_id));
        }

        // Keep the clock from dispatching the room while its recording stops.
        self.schedule.retire(room_id);
        let (outcome, room) = self.controller.retire(room_id).await;
        self.schedule.forget(room_id);
        self.registry.remove(room_id).await?;

        let room = room.ok_or_else(|| Error::not_found("Room", room_id))?;
        info!(room = %room, stop = ?outcome, "Room removed");
        Ok(room)
    }

    /// Replace a room's attributes and persist the room list.
    ///
    /// Turning `auto_record` off stops future probes but leaves an active
    /// recording running.
    pub async fn update_room(&self, room: Room) -> Result<Room> {
        let mut snapshot = self.rooms.snapshot();
        let slot = snapshot
            .iter_mut()
            .find(|r| r.room_id == room.room_id)
            .ok_or_else(|| Error::not_found("Room", &room.room_id))?;
        *slot = room.clone();
        self.registry.save_all(&snapshot).await?;

        let previous = self.rooms.update(room.clone())?;

        if previous.tier() != room.tier() && !self.controller.table().contains(&room.room_id) {
            self.schedule.reschedule(&room.room_id, room.tier(), Instant::now());
        }
        info!(room = %room, "Room updated");
        Ok(previous)
    }

    /// Stop a room's recording. Stopping an idle room is a no-op.
    pub async fn stop_recording(&self, room_id: &str) -> StopOutcome {
        if self.controller.table().contains(room_id)
            && let Some(room) = self.rooms.get(room_id)
        {
            self.schedule.reschedule(room_id, room.tier(), Instant::now());
        }
        self.controller.stop(room_id).await
    }

    /// Stop everything: the clock, in-flight probes, the workers, then every
    /// active recording within the stop grace period.
    pub async fn shutdown(&self) {
        info!("Shutting down scheduler");
        self.cancellation_token.cancel();
        self.schedule.cancel_all();
        self.pool.stop().await;

        let join_set = self.tasks.lock().take();
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        let stopped = self.controller.stop_all().await;
        for (room_id, outcome) in &stopped {
            debug!(room_id = %room_id, ?outcome, "Recording stopped on shutdown");
        }
        info!(recordings = stopped.len(), "Scheduler stopped");
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id)
    }

    /// Every room, ordered by id.
    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.snapshot()
    }

    /// Auto-recorded rooms without an active recording.
    pub fn rooms_needed_to_record(&self) -> Vec<Room> {
        let table = self.controller.table();
        self.rooms
            .auto_record_rooms()
            .into_iter()
            .filter(|room| !table.contains(&room.room_id))
            .collect()
    }

    pub fn recordings(&self) -> Vec<RecordingEntry> {
        self.controller.table().list()
    }

    pub fn recording(&self, room_id: &str) -> Option<RecordingEntry> {
        self.controller.table().get(room_id)
    }

    pub fn is_recording(&self, room_id: &str) -> bool {
        self.controller.table().contains(room_id)
    }

    pub fn state(&self, room_id: &str) -> RecordingState {
        self.controller.state(room_id)
    }

    /// Workers currently running a probe.
    pub fn active_probes(&self) -> usize {
        self.pool.active_count()
    }
}

/// Clock driver: every tick, enqueue the rooms that are due.
///
/// Never waits on probe or recorder work.
async fn run_clock(
    tick_interval: std::time::Duration,
    rooms: Arc<RoomSet>,
    schedule: Arc<ProbeScheduler>,
    controller: Arc<RecordingController>,
    queue: Arc<ProbeQueue>,
    cancellation_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => break,
            _ = ticker.tick() => {
                let due = schedule.collect_due(Instant::now(), &rooms, controller.table());
                if !due.is_empty() {
                    debug!(count = due.len(), "Enqueueing due probes");
                    queue.push_all(due);
                }
            }
        }
    }
    debug!("Scheduler clock stopped");
}

/// Return a room whose stream ended to idle.
///
/// The next due time is pushed out before the entry disappears, so the
/// clock cannot re-probe the room right away.
async fn finish_recording(
    rooms: &RoomSet,
    schedule: &ProbeScheduler,
    controller: &RecordingController,
    room_id: &str,
    token: &RecordingToken,
) {
    if let Some(room) = rooms.get(room_id) {
        schedule.reschedule(room_id, room.tier(), Instant::now());
    }
    controller.on_stream_ended(token).await;
}

/// Apply recorder lifecycle events.
async fn run_recorder_events(
    mut events: tokio::sync::broadcast::Receiver<RecorderEvent>,
    rooms: Arc<RoomSet>,
    schedule: Arc<ProbeScheduler>,
    controller: Arc<RecordingController>,
    cancellation_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancellation_token.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(RecorderEvent::StreamEnded(token)) => {
                let rooms = rooms.clone();
                let schedule = schedule.clone();
                let controller = controller.clone();
                tokio::spawn(async move {
                    if let Some(room_id) = controller.table().find_by_token(&token) {
                        finish_recording(&rooms, &schedule, &controller, &room_id, &token).await;
                    } else {
                        controller.on_stream_ended(&token).await;
                    }
                });
            }
            Err(RecvError::Lagged(n)) => {
                warn!("Recorder event stream lagged, {} events dropped", n);
                let rooms = rooms.clone();
                let schedule = schedule.clone();
                let controller = controller.clone();
                tokio::spawn(async move {
                    for (room_id, token) in controller.stale_recordings() {
                        info!(room_id = %room_id, token = %token, "Recovering recording whose end was missed");
                        finish_recording(&rooms, &schedule, &controller, &room_id, &token).await;
                    }
                });
            }
            Err(RecvError::Closed) => {
                debug!("Recorder event stream closed");
                break;
            }
        }
    }
}
