//! Stream-status probing.
//!
//! The monitor module defines the probe collaborator used by the worker pool
//! to decide whether a room is live:
//! - [`StreamProbe`]: the liveness check contract
//! - [`LiveStatus`] / [`CaptureHandle`]: probe results
//! - [`CommandProbe`]: a probe backed by an external program

mod command;
mod probe;

pub use command::CommandProbe;
pub use probe::{CaptureHandle, LiveStatus, ProbeError, StreamProbe};
