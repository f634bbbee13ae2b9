//! Recording lifecycle.
//!
//! - [`Recorder`]: the capture collaborator contract
//! - [`RecordingTable`]: the single source of truth for active recordings
//! - [`RecordingController`]: per-room state machine driving the recorder
//! - [`CommandRecorder`]: a recorder running one external process per room

mod command;
mod controller;
mod recorder;
mod table;

pub use command::{CommandRecorder, CommandRecorderConfig};
pub use controller::{ControllerConfig, RecordingController, StartOutcome, StopOutcome};
pub use recorder::{RECORDER_EVENT_CAPACITY, Recorder, RecorderError, RecorderEvent, RecordingToken};
pub use table::{RecordingEntry, RecordingTable};
