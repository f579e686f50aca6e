//! Bidirectional room membership index.
use std::collections::{HashMap, HashSet, hash_map::Entry};

use crate::Sid;

use super::Room;

/// Room lifecycle event emitted by [`RoomIndex`] mutations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomEvent {
    /// The room got its first member
    Create(Room),
    /// A socket joined the room
    Join(Room, Sid),
    /// A socket left the room
    Leave(Room, Sid),
    /// The room lost its last member and was removed
    Delete(Room),
}

/// Room membership, indexed both ways: `room -> sockets` and `socket -> rooms`.
///
/// A room is present only while it has at least one member.
#[derive(Debug, Default, Clone)]
pub struct RoomIndex {
    rooms: HashMap<Room, HashSet<Sid>>,
    sockets: HashMap<Sid, HashSet<Room>>,
}

impl RoomIndex {
    /// Add the socket to every room. Events are pushed for new rooms and new memberships only.
    pub fn add_all(
        &mut self,
        sid: Sid,
        rooms: impl IntoIterator<Item = Room>,
        events: &mut Vec<RoomEvent>,
    ) {
        for room in rooms {
            let members = match self.rooms.entry(room.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    events.push(RoomEvent::Create(room.clone()));
                    entry.insert(HashSet::new())
                }
            };
            if members.insert(sid) {
                self.sockets.entry(sid).or_default().insert(room.clone());
                events.push(RoomEvent::Join(room, sid));
            }
        }
    }

    /// Remove the socket from every given room.
    pub fn del(
        &mut self,
        sid: Sid,
        rooms: impl IntoIterator<Item = Room>,
        events: &mut Vec<RoomEvent>,
    ) {
        for room in rooms {
            self.leave(sid, &room, events);
        }
        if self.sockets.get(&sid).is_some_and(HashSet::is_empty) {
            self.sockets.remove(&sid);
        }
    }

    /// Remove the socket from all of its rooms.
    pub fn del_all(&mut self, sid: Sid, events: &mut Vec<RoomEvent>) {
        let Some(rooms) = self.sockets.remove(&sid) else {
            return;
        };
        for room in rooms {
            if let Entry::Occupied(mut entry) = self.rooms.entry(room) {
                entry.get_mut().remove(&sid);
                let room = entry.key().clone();
                events.push(RoomEvent::Leave(room.clone(), sid));
                if entry.get().is_empty() {
                    entry.remove();
                    events.push(RoomEvent::Delete(room));
                }
            }
        }
    }

    fn leave(&mut self, sid: Sid, room: &Room, events: &mut Vec<RoomEvent>) {
        let Some(members) = self.rooms.get_mut(room) else {
            return;
        };
        if !members.remove(&sid) {
            return;
        }
        if let Some(rooms) = self.sockets.get_mut(&sid) {
            rooms.remove(room);
        }
        events.push(RoomEvent::Leave(room.clone(), sid));
        if members.is_empty() {
            self.rooms.remove(room);
            events.push(RoomEvent::Delete(room.clone()));
        }
    }

    /// Members of a room.
    pub fn members(&self, room: &str) -> Option<&HashSet<Sid>> {
        self.rooms.get(room)
    }

    /// Rooms of a socket.
    pub fn socket_rooms(&self, sid: &Sid) -> Option<&HashSet<Room>> {
        self.sockets.get(sid)
    }

    /// Every non empty room.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.keys()
    }

    /// Number of non empty rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Returns true if no room has any member.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Remove every room and membership.
    pub fn clear(&mut self) {
        self.rooms.clear();
        self.rooms.shrink_to_fit();
        self.sockets.clear();
        self.sockets.shrink_to_fit();
    }
}
