//! In-memory room set.
//!
//! The RoomSet is the authoritative runtime view of the configured rooms.
//! Persistence belongs to the [`crate::registry`] collaborator.

mod set;

pub use set::RoomSet;
