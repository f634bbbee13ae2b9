//! room-srec library crate.
//!
//! Watches a set of live rooms, probes them on per-tier cadences with a
//! bounded worker pool, and drives one recording per live room.

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod recording;
pub mod registry;
pub mod rooms;
pub mod scheduler;

pub use error::{Error, Result};
