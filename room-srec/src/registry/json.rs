//! `rooms.json` backed registry.
//!
//! File format: a JSON array of
//! `{"id", "name", "auto_record", "record_danmu", "important", "user_sec_id"}`
//! objects. Files written before the `important` flag existed are upgraded in
//! place on load.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::RoomRegistry;
use crate::domain::Room;
use crate::{Error, Result};

const UTF8_BOM: char = '\u{feff}';

/// Persisted shape of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoomRecord {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    name: String,
    auto_record: bool,
    record_danmu: bool,
    #[serde(default)]
    important: Option<bool>,
    #[serde(default)]
    user_sec_id: Option<String>,
}

impl RoomRecord {
    fn from_room(room: &Room) -> Self {
        Self {
            id: room.room_id.clone(),
            name: room.display_name.clone(),
            auto_record: room.auto_record,
            record_danmu: room.record_side_channel,
            important: Some(room.important),
            user_sec_id: room.secondary_id.clone(),
        }
    }

    fn into_room(self) -> Room {
        Room {
            room_id: self.id,
            display_name: self.name,
            auto_record: self.auto_record,
            record_side_channel: self.record_danmu,
            important: self.important.unwrap_or(false),
            secondary_id: self.user_sec_id,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "room id must be a string or number, got {}",
            other
        ))),
    }
}

/// Registry persisting rooms to a JSON file.
pub struct JsonRoomRegistry {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file.
    io_lock: Mutex<()>,
}

impl JsonRoomRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_records(&self) -> Result<Vec<RoomRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Room file not found, creating an empty one");
                if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&self.path, "[]").await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let content = content.strip_prefix(UTF8_BOM).unwrap_or(&content);
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(content)?)
    }

    async fn write_records(&self, records: &[RoomRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl RoomRegistry for JsonRoomRegistry {
    async fn load_all(&self) -> Result<Vec<Room>> {
        let _guard = self.io_lock.lock().await;
        let records = self.read_records().await?;

        let needs_upgrade = records.iter().any(|r| r.important.is_none());
        let mut seen = HashSet::new();
        let mut rooms = Vec::with_capacity(records.len());

        for record in records {
            if !seen.insert(record.id.clone()) {
                warn!(room_id = %record.id, "Duplicate room id in room file, keeping the first entry");
                continue;
            }
            let room = record.into_room();
            info!(
                room_id = %room.room_id,
                name = %room.display_name,
                auto_record = room.auto_record,
                record_danmu = room.record_side_channel,
                important = room.important,
                user_sec_id = ?room.secondary_id,
                "Loaded room"
            );
            rooms.push(room);
        }

        if needs_upgrade {
            let records: Vec<_> = rooms.iter().map(RoomRecord::from_room).collect();
            self.write_records(&records).await?;
            info!(path = %self.path.display(), "Room file upgraded to the current format");
        }

        Ok(rooms)
    }

    async fn save_all(&self, rooms: &[Room]) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let records: Vec<_> = rooms.iter().map(RoomRecord::from_room).collect();
        self.write_records(&records).await?;
        debug!(count = records.len(), "Saved rooms");
        Ok(())
    }

    async fn add(&self, room: &Room) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut records = self.read_records().await?;
        if records.iter().any(|r| r.id == room.room_id) {
            return Err(Error::DuplicateRoom(room.room_id.clone()));
        }
        records.push(RoomRecord::from_room(room));
        self.write_records(&records).await
    }

    async fn remove(&self, room_id: &str) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut records = self.read_records().await?;
        let before = records.len();
        records.retain(|r| r.id != room_id);
        if records.len() != before {
            self.write_records(&records).await?;
        }
        Ok(())
    }
}
