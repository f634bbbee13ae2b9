//! Domain layer for room-srec.
//!
//! Rooms, their polling tier and the per-room recording state machine.

pub mod room;
pub mod state;
pub mod tier;

pub use room::Room;
pub use state::RecordingState;
pub use tier::Tier;
