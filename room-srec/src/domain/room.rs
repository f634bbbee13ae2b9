//! Room entity.

use serde::{Deserialize, Serialize};

use super::Tier;

/// A live-broadcast room that may be monitored and recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Opaque, stable, unique identifier.
    pub room_id: String,
    /// Informational name.
    pub display_name: String,
    /// Eligible for scheduling. Rooms with this unset are never probed.
    pub auto_record: bool,
    /// Capture the side channel (danmu) alongside the media.
    pub record_side_channel: bool,
    /// Selects the fast-poll tier.
    pub important: bool,
    /// Secondary identifier forwarded to the probe.
    pub secondary_id: Option<String>,
}

impl Room {
    /// Create a room with auto-record enabled and every other flag off.
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            display_name: display_name.into(),
            auto_record: true,
            record_side_channel: false,
            important: false,
            secondary_id: None,
        }
    }

    pub fn with_auto_record(mut self, auto_record: bool) -> Self {
        self.auto_record = auto_record;
        self
    }

    pub fn with_side_channel(mut self, record_side_channel: bool) -> Self {
        self.record_side_channel = record_side_channel;
        self
    }

    pub fn with_important(mut self, important: bool) -> Self {
        self.important = important;
        self
    }

    pub fn with_secondary_id(mut self, secondary_id: impl Into<String>) -> Self {
        self.secondary_id = Some(secondary_id.into());
        self
    }

    pub fn tier(&self) -> Tier {
        Tier::from_important(self.important)
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.display_name, self.room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_builder() {
        let room = Room::new("100", "alice")
            .with_important(true)
            .with_side_channel(true)
            .with_secondary_id("sec-1");

        assert!(room.auto_record);
        assert!(room.record_side_channel);
        assert_eq!(room.tier(), Tier::Important);
        assert_eq!(room.secondary_id.as_deref(), Some("sec-1"));
        assert_eq!(room.to_string(), "alice(100)");
    }

    #[test]
    fn test_room_default_tier() {
        let room = Room::new("1", "bob");
        assert_eq!(room.tier(), Tier::Normal);
    }
}
