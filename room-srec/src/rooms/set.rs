//! RoomSet implementation.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::domain::Room;
use crate::{Error, Result};

/// Concurrent set of rooms keyed by `room_id`.
///
/// Reads never block each other. Inserts and removals only lock the shard
/// holding the affected room.
#[derive(Debug, Default)]
pub struct RoomSet {
    rooms: DashMap<String, Room>,
}

impl RoomSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from rooms loaded at startup.
    ///
    /// Duplicate ids are rejected so the uniqueness invariant holds from the
    /// first tick.
    pub fn from_rooms(rooms: impl IntoIterator<Item = Room>) -> Result<Self> {
        let set = Self::new();
        for room in rooms {
            set.insert(room)?;
        }
        Ok(set)
    }

    /// Add a room. Fails if the id is already present.
    pub fn insert(&self, room: Room) -> Result<()> {
        match self.rooms.entry(room.room_id.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateRoom(room.room_id)),
            Entry::Vacant(entry) => {
                debug!(room_id = %room.room_id, "Room added to set");
                entry.insert(room);
                Ok(())
            }
        }
    }

    /// Replace the attributes of an existing room.
    pub fn update(&self, room: Room) -> Result<Room> {
        match self.rooms.get_mut(&room.room_id) {
            Some(mut entry) => Ok(std::mem::replace(entry.value_mut(), room)),
            None => Err(Error::not_found("Room", room.room_id)),
        }
    }

    /// Remove a room, returning it if it was present.
    pub fn remove(&self, room_id: &str) -> Option<Room> {
        self.rooms.remove(room_id).map(|(_, room)| room)
    }

    pub fn get(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Point-in-time copy of all rooms, ordered by id.
    pub fn snapshot(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self.rooms.iter().map(|entry| entry.value().clone()).collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    /// Rooms eligible for scheduling, ordered by id.
    pub fn auto_record_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .rooms
            .iter()
            .filter(|entry| entry.auto_record)
            .map(|entry| entry.value().clone())
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}
