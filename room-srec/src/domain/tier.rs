//! Polling tier value object.

use serde::{Deserialize, Serialize};

/// Polling tier of a room.
///
/// Each tier has its own base period and jitter bound. Tiering is expressed
/// purely through cadence: probe tasks of both tiers share one FIFO queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Rooms flagged `important`, polled on the fast cadence.
    Important,
    /// Everything else.
    #[default]
    Normal,
}

impl Tier {
    /// Derive the tier from a room's `important` flag.
    pub fn from_important(important: bool) -> Self {
        if important {
            Self::Important
        } else {
            Self::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Important => "IMPORTANT",
            Self::Normal => "NORMAL",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
