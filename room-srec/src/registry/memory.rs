//! In-memory registry.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::RoomRegistry;
use crate::domain::Room;
use crate::{Error, Result};

/// Registry that keeps rooms in memory only.
#[derive(Debug, Default)]
pub struct MemoryRoomRegistry {
    rooms: Mutex<Vec<Room>>,
}

impl MemoryRoomRegistry {
    pub fn new(rooms: Vec<Room>) -> Self {
        Self {
            rooms: Mutex::new(rooms),
        }
    }

    /// Current contents, in insertion order.
    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.lock().clone()
    }
}

#[async_trait]
impl RoomRegistry for MemoryRoomRegistry {
    async fn load_all(&self) -> Result<Vec<Room>> {
        Ok(self.rooms())
    }

    async fn save_all(&self, rooms: &[Room]) -> Result<()> {
        *self.rooms.lock() = rooms.to_vec();
        Ok(())
    }

    async fn add(&self, room: &Room) -> Result<()> {
        let mut rooms = self.rooms.lock();
        if rooms.iter().any(|r| r.room_id == room.room_id) {
            return Err(Error::DuplicateRoom(room.room_id.clone()));
        }
        rooms.push(room.clone());
        Ok(())
    }

    async fn remove(&self, room_id: &str) -> Result<()> {
        self.rooms.lock().retain(|r| r.room_id != room_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_registry_roundtrip() {
        let registry = MemoryRoomRegistry::default();
        registry.add(&Room::new("1", "a")).await.unwrap();
        registry.add(&Room::new("2", "b")).await.unwrap();
        assert!(registry.add(&Room::new("1", "dup")).await.is_err());

        registry.remove("1").await.unwrap();
        registry.remove("missing").await.unwrap();

        let rooms = registry.load_all().await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_id, "2");
    }
}
