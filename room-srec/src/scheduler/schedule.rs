//! Per-tier probe cadence and the due-set computation.
//!
//! Every room carries scheduler-private timing state: when it was last
//! probed and when it is next due. Dispatch only marks a room in flight.
//! The worker stamps the probe when it actually runs, and the next due time
//! is recomputed from that moment as `now + period + U[0, jitter)`. A task
//! that waited in the queue therefore never shortens the following gap.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::task::ProbeTask;
use crate::config::SchedulerConfig;
use crate::domain::Tier;
use crate::recording::RecordingTable;
use crate::rooms::RoomSet;

/// Source of jitter samples in `[0, 1)`.
pub type JitterSampler = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Base period and jitter bound of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCadence {
    pub period: Duration,
    pub jitter: Duration,
}

impl TierCadence {
    pub fn new(period: Duration, jitter: Duration) -> Self {
        Self { period, jitter }
    }

    pub fn from_secs(period: u64, jitter: u64) -> Self {
        Self::new(Duration::from_secs(period), Duration::from_secs(jitter))
    }

    /// Delay until the next probe for a jitter sample in `[0, 1)`.
    pub fn delay(&self, sample: f64) -> Duration {
        self.period + self.jitter.mul_f64(sample.clamp(0.0, 1.0))
    }
}

#[derive(Debug)]
struct ScheduleEntry {
    last_probed_at: Option<Instant>,
    next_due_at: Instant,
    /// Dispatched task not yet completed.
    in_flight: Option<(u64, CancellationToken)>,
    /// The room is being removed and must not be dispatched again.
    retiring: bool,
}

impl ScheduleEntry {
    fn due_now(now: Instant) -> Self {
        Self {
            last_probed_at: None,
            next_due_at: now,
            in_flight: None,
            retiring: false,
        }
    }
}

/// Decides which rooms are due for a liveness probe.
pub struct ProbeScheduler {
    normal: TierCadence,
    important: TierCadence,
    entries: Mutex<HashMap<String, ScheduleEntry>>,
    sampler: JitterSampler,
    next_task_id: AtomicU64,
    /// Parent of every task's cancellation token.
    cancellation_token: CancellationToken,
}

impl ProbeScheduler {
    pub fn new(normal: TierCadence, important: TierCadence) -> Self {
        Self {
            normal,
            important,
            entries: Mutex::new(HashMap::new()),
            sampler: Arc::new(rand::random::<f64>),
            next_task_id: AtomicU64::new(1),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.normal, config.important)
    }

    /// Replace the jitter source.
    pub fn with_sampler(mut self, sampler: JitterSampler) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn cadence(&self, tier: Tier) -> TierCadence {
        match tier {
            Tier::Important => self.important,
            Tier::Normal => self.normal,
        }
    }

    fn next_delay(&self, tier: Tier) -> Duration {
        self.cadence(tier).delay((self.sampler)())
    }

    /// Collect the rooms due at `now` and mark them in flight.
    ///
    /// A room is due when it is auto-recorded, has no recording entry, has
    /// no probe in flight, is not being removed and its next due time has
    /// passed. Rooms never seen before are due immediately. Tasks are
    /// ordered by how long they have been due.
    pub fn collect_due(&self, now: Instant, rooms: &RoomSet, table: &RecordingTable) -> Vec<ProbeTask> {
        let mut entries = self.entries.lock();
        entries.retain(|room_id, _| rooms.contains(room_id));

        let mut due = Vec::new();
        for room in rooms.auto_record_rooms() {
            if table.contains(&room.room_id) {
                continue;
            }
            let entry = entries
                .entry(room.room_id.clone())
                .or_insert_with(|| ScheduleEntry::due_now(now));
            if entry.retiring || entry.in_flight.is_some() || entry.next_due_at > now {
                continue;
            }
            due.push((entry.next_due_at, room));
        }
        due.sort_by(|(a, ra), (b, rb)| a.cmp(b).then_with(|| ra.room_id.cmp(&rb.room_id)));

        due.into_iter()
            .filter_map(|(_, room)| {
                let entry = entries.get_mut(&room.room_id)?;
                let tier = room.tier();
                let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
                let task = ProbeTask::new(id, room.room_id, tier, now, &self.cancellation_token);

                entry.in_flight = Some((id, task.cancellation_token.clone()));
                trace!(room_id = %task.room_id, tier = %tier, "Probe dispatched");
                Some(task)
            })
            .collect()
    }

    /// Stamp the moment a dispatched task's probe actually starts.
    ///
    /// The next due time counts from `now`, so time spent queued behind
    /// other rooms does not shorten the gap to the following probe. Returns
    /// `false` for superseded tasks, which leave the schedule untouched.
    pub fn mark_probed(&self, task: &ProbeTask, now: Instant) -> bool {
        let delay = self.next_delay(task.tier);
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&task.room_id) else {
            return false;
        };
        if !matches!(entry.in_flight, Some((id, _)) if id == task.id) {
            return false;
        }

        entry.last_probed_at = Some(now);
        entry.next_due_at = now + delay;
        trace!(
            room_id = %task.room_id,
            waited = ?now.saturating_duration_since(task.enqueued_at),
            next_in = ?delay,
            "Probe started"
        );
        true
    }

    /// Mark a dispatched task finished.
    ///
    /// Completions of tasks that were superseded (room removed and re-added)
    /// are ignored.
    pub fn complete(&self, task: &ProbeTask) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&task.room_id)
            && matches!(entry.in_flight, Some((id, _)) if id == task.id)
        {
            entry.in_flight = None;
        }
    }

    /// Restart a room's cadence from `now`, e.g. after its recording ended.
    pub fn reschedule(&self, room_id: &str, tier: Tier, now: Instant) {
        let delay = self.next_delay(tier);
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(room_id.to_string())
            .or_insert_with(|| ScheduleEntry::due_now(now));
        entry.next_due_at = now + delay;
        debug!(room_id = %room_id, tier = %tier, next_in = ?delay, "Room rescheduled");
    }

    /// Stop dispatching a room that is being removed and cancel its
    /// in-flight probe. The state is dropped later by [`Self::forget`].
    pub fn retire(&self, room_id: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(room_id.to_string())
            .or_insert_with(|| ScheduleEntry::due_now(Instant::now()));
        entry.retiring = true;
        if let Some((_, token)) = entry.in_flight.take() {
            token.cancel();
        }
    }

    /// Drop a room's timing state and cancel its in-flight probe.
    pub fn forget(&self, room_id: &str) {
        if let Some(entry) = self.entries.lock().remove(room_id)
            && let Some((_, token)) = entry.in_flight
        {
            token.cancel();
        }
    }

    /// Cancel every in-flight probe.
    pub fn cancel_all(&self) {
        self.cancellation_token.cancel();
    }

    pub fn next_due(&self, room_id: &str) -> Option<Instant> {
        self.entries.lock().get(room_id).map(|e| e.next_due_at)
    }

    pub fn last_probed(&self, room_id: &str) -> Option<Instant> {
        self.entries.lock().get(room_id).and_then(|e| e.last_probed_at)
    }

    pub fn is_in_flight(&self, room_id: &str) -> bool {
        self.entries
            .lock()
            .get(room_id)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// Number of rooms with timing state.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Room;
    use crate::monitor::CaptureHandle;

    fn scheduler(sample: f64) -> ProbeScheduler {
        ProbeScheduler::new(TierCadence::from_secs(30, 10), TierCadence::from_secs(3, 1))
            .with_sampler(Arc::new(move || sample))
    }

    fn ids(tasks: &[ProbeTask]) -> Vec<&str> {
        tasks.iter().map(|t| t.room_id.as_str()).collect()
    }

    #[test]
    fn test_cadence_delay_bounds() {
        let cadence = TierCadence::from_secs(3, 1);
        assert_eq!(cadence.delay(0.0), Duration::from_secs(3));
        assert_eq!(cadence.delay(0.5), Duration::from_millis(3500));
        assert_eq!(cadence.delay(7.0), Duration::from_secs(4));
        assert_eq!(TierCadence::from_secs(5, 0).delay(0.9), Duration::from_secs(5));
    }

    #[test]
    fn test_new_rooms_are_due_immediately() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a"), Room::new("2", "b")]).unwrap();
        let now = Instant::now();

        let tasks = schedule.collect_due(now, &rooms, &RecordingTable::new());
        assert_eq!(ids(&tasks), vec!["1", "2"]);
        assert!(schedule.is_in_flight("1"));
        assert_eq!(schedule.last_probed("1"), None);
    }

    #[test]
    fn test_next_due_counts_from_probe_start() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a").with_important(true)]).unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        let task = schedule.collect_due(start, &rooms, &table).remove(0);
        assert_eq!(schedule.next_due("1"), Some(start));

        // Waited 2s in the queue behind other rooms.
        let probed_at = start + Duration::from_secs(2);
        assert!(schedule.mark_probed(&task, probed_at));
        schedule.complete(&task);

        assert_eq!(schedule.last_probed("1"), Some(probed_at));
        assert_eq!(schedule.next_due("1"), Some(probed_at + Duration::from_secs(3)));
        assert!(schedule
            .collect_due(start + Duration::from_secs(4), &rooms, &table)
            .is_empty());
        assert_eq!(
            ids(&schedule.collect_due(probed_at + Duration::from_secs(3), &rooms, &table)),
            vec!["1"]
        );
    }

    #[test]
    fn test_mark_probed_ignores_superseded_task() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a")]).unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        let stale = schedule.collect_due(start, &rooms, &table).remove(0);
        schedule.forget("1");
        let _fresh = schedule.collect_due(start, &rooms, &table).remove(0);

        assert!(!schedule.mark_probed(&stale, start + Duration::from_secs(1)));
        assert_eq!(schedule.last_probed("1"), None);
    }

    #[test]
    fn test_auto_record_off_never_selected() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a").with_auto_record(false)]).unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        for step in 0..100 {
            let now = start + Duration::from_secs(step);
            assert!(schedule.collect_due(now, &rooms, &table).is_empty());
        }
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_in_flight_room_not_redispatched() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a").with_important(true)]).unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        let tasks = schedule.collect_due(start, &rooms, &table);
        assert_eq!(tasks.len(), 1);
        assert!(schedule.is_in_flight("1"));
        assert!(schedule
            .collect_due(start + Duration::from_secs(10), &rooms, &table)
            .is_empty());

        schedule.complete(&tasks[0]);
        let tasks = schedule.collect_due(start + Duration::from_secs(10), &rooms, &table);
        assert_eq!(ids(&tasks), vec!["1"]);
    }

    #[test]
    fn test_recording_room_excluded() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a"), Room::new("2", "b")]).unwrap();
        let table = RecordingTable::new();
        assert!(table.try_insert("1", CaptureHandle::new("u")));

        let tasks = schedule.collect_due(Instant::now(), &rooms, &table);
        assert_eq!(ids(&tasks), vec!["2"]);
    }

    #[test]
    fn test_tiers_use_independent_cadence() {
        let schedule = scheduler(1.0);
        let rooms = RoomSet::from_rooms(vec![
            Room::new("fast", "a").with_important(true),
            Room::new("slow", "b"),
        ])
        .unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        for task in schedule.collect_due(start, &rooms, &table) {
            schedule.mark_probed(&task, start);
            schedule.complete(&task);
        }
        assert_eq!(schedule.next_due("fast"), Some(start + Duration::from_secs(4)));
        assert_eq!(schedule.next_due("slow"), Some(start + Duration::from_secs(40)));

        let tasks = schedule.collect_due(start + Duration::from_secs(4), &rooms, &table);
        assert_eq!(ids(&tasks), vec!["fast"]);
    }

    #[test]
    fn test_next_due_recomputed_from_dispatch_time() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a").with_important(true)]).unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        let task = schedule.collect_due(start, &rooms, &table).remove(0);
        schedule.mark_probed(&task, start);
        schedule.complete(&task);

        // Dispatched 7s late; the next due time is based on the late probe.
        let late = start + Duration::from_secs(10);
        let task = schedule.collect_due(late, &rooms, &table).remove(0);
        schedule.mark_probed(&task, late);
        schedule.complete(&task);
        assert_eq!(schedule.next_due("1"), Some(late + Duration::from_secs(3)));
    }

    #[test]
    fn test_forget_cancels_in_flight_probe() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a")]).unwrap();
        let task = schedule
            .collect_due(Instant::now(), &rooms, &RecordingTable::new())
            .remove(0);

        schedule.forget("1");
        assert!(task.is_cancelled());
        assert_eq!(schedule.next_due("1"), None);
    }

    #[test]
    fn test_retiring_room_not_dispatched() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a"), Room::new("2", "b")]).unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        let task = schedule
            .collect_due(start, &rooms, &table)
            .into_iter()
            .find(|t| t.room_id == "1")
            .unwrap();
        schedule.retire("1");
        assert!(task.is_cancelled());
        assert!(!schedule.is_in_flight("1"));

        // Still in the room set while its recording is being stopped.
        let later = start + Duration::from_secs(60);
        assert!(schedule.collect_due(later, &rooms, &table).iter().all(|t| t.room_id != "1"));

        // Retired before its first dispatch.
        schedule.retire("3");
        rooms.insert(Room::new("3", "c")).unwrap();
        assert!(schedule.collect_due(later, &rooms, &table).iter().all(|t| t.room_id != "3"));

        schedule.forget("1");
        assert_eq!(schedule.next_due("1"), None);
    }

    #[test]
    fn test_stale_completion_ignored() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a")]).unwrap();
        let table = RecordingTable::new();
        let start = Instant::now();

        let stale = schedule.collect_due(start, &rooms, &table).remove(0);
        schedule.forget("1");
        let _fresh = schedule.collect_due(start, &rooms, &table).remove(0);

        schedule.complete(&stale);
        assert!(schedule.is_in_flight("1"));
    }

    #[test]
    fn test_removed_rooms_pruned() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a"), Room::new("2", "b")]).unwrap();
        let table = RecordingTable::new();
        schedule.collect_due(Instant::now(), &rooms, &table);
        assert_eq!(schedule.len(), 2);

        rooms.remove("2");
        schedule.collect_due(Instant::now(), &rooms, &table);
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn test_reschedule_after_recording() {
        let schedule = scheduler(0.5);
        let now = Instant::now();
        schedule.reschedule("1", Tier::Important, now);
        assert_eq!(schedule.next_due("1"), Some(now + Duration::from_millis(3500)));
    }

    #[test]
    fn test_cancel_all() {
        let schedule = scheduler(0.0);
        let rooms = RoomSet::from_rooms(vec![Room::new("1", "a")]).unwrap();
        let task = schedule
            .collect_due(Instant::now(), &rooms, &RecordingTable::new())
            .remove(0);
        schedule.cancel_all();
        assert!(task.is_cancelled());
    }
}
