//! Directory of controlled rooms.
//!
//! Gives the session controller instant room validation without calling the
//! admin service. The directory is read-only here; create/update screens
//! belong to the admin surface.

use std::collections::HashMap;
use turnstile_core::{Room, RoomId};

/// Lookup table keyed by room id.
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
}

impl RoomDirectory {
    pub fn new(rooms: impl IntoIterator<Item = Room>) -> Self {
        Self {
            rooms: rooms.into_iter().map(|room| (room.id.clone(), room)).collect(),
        }
    }

    /// Returns the room for a known id, if any.
    pub fn lookup(&self, id: &RoomId) -> Option<&Room> {
        self.rooms.get(id)
    }

    pub fn contains(&self, id: &RoomId) -> bool {
        self.rooms.contains_key(id)
    }

    /// All rooms, ordered by id for stable rendering.
    pub fn list(&self) -> Vec<&Room> {
        let mut rooms: Vec<&Room> = self.rooms.values().collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

impl Default for RoomDirectory {
    /// The campus floor plan shipped with the client.
    fn default() -> Self {
        Self::new([
            room("room-a", "Lab A - Electronics", "Building 2, Floor 3", 30),
            room("room-b", "Lab B - Programming", "Building 1, Floor 2", 25),
            room("room-c", "Lab C - Robotics", "Building 3, Floor 1", 20),
            room("room-d", "Lab D - Networks", "Building 2, Floor 1", 35),
        ])
    }
}

fn room(id: &str, name: &str, location: &str, capacity: u32) -> Room {
    Room {
        id: RoomId::from(id),
        name: name.to_owned(),
        location: location.to_owned(),
        capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_lab_a() {
        let directory = RoomDirectory::default();
        let room = directory.lookup(&RoomId::from("room-a")).unwrap();
        assert_eq!(room.name, "Lab A - Electronics");
        assert_eq!(room.location, "Building 2, Floor 3");
        assert_eq!(room.capacity, 30);
    }

    #[test]
    fn unknown_returns_none() {
        let directory = RoomDirectory::default();
        assert!(directory.lookup(&RoomId::from("room-z")).is_none());
        assert!(!directory.contains(&RoomId::from("room-z")));
    }

    #[test]
    fn list_is_sorted_by_id() {
        let directory = RoomDirectory::default();
        let ids: Vec<&str> = directory.list().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["room-a", "room-b", "room-c", "room-d"]);
    }

    #[test]
    fn custom_directory() {
        let directory = RoomDirectory::new([room("clean-room", "Cleanroom", "Building 4", 4)]);
        assert_eq!(directory.len(), 1);
        assert!(directory.contains(&RoomId::from("clean-room")));
    }
}
