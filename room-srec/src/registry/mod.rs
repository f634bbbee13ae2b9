//! Room registry collaborator.
//!
//! The registry owns the durable room list. The scheduler only reads it at
//! startup and forwards explicit add/remove/update operations to it.

mod json;
mod memory;

use async_trait::async_trait;

use crate::Result;
use crate::domain::Room;

pub use json::JsonRoomRegistry;
pub use memory::MemoryRoomRegistry;

/// Durable storage of the room list.
#[async_trait]
pub trait RoomRegistry: Send + Sync + 'static {
    /// Load every persisted room.
    async fn load_all(&self) -> Result<Vec<Room>>;

    /// Replace the persisted list.
    async fn save_all(&self, rooms: &[Room]) -> Result<()>;

    /// Persist a new room. Fails with `DuplicateRoom` if the id exists.
    async fn add(&self, room: &Room) -> Result<()>;

    /// Remove a room. Unknown ids are ignored.
    async fn remove(&self, room_id: &str) -> Result<()>;
}
