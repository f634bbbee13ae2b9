//! Scheduling core.
//!
//! The clock ticks at a fixed base interval and asks the
//! [`ProbeScheduler`] which rooms are due. Due rooms become [`ProbeTask`]s
//! in the [`WorkerPool`]'s FIFO queue; workers run the probe with a timeout
//! and hand live results to the recording controller within the same task.
//! Tiers differ only in cadence, never in queue priority.

mod schedule;
mod service;
mod task;
mod worker_pool;

pub use schedule::{JitterSampler, ProbeScheduler, TierCadence};
pub use service::Scheduler;
pub use task::ProbeTask;
pub use worker_pool::{ProbeContext, ProbeOutcome, ProbeQueue, WorkerPool, WorkerPoolConfig};
