//! Who a broadcast reaches.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::{RemoteSocketData, Room};
use crate::{Sid, Uid};

/// Modifiers of a broadcast, stored as bits in [`BroadcastOptions`].
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum BroadcastFlags {
    /// Stay on this server, the other servers of a cluster are not asked.
    Local = 0x01,
    /// Every selected socket but the sender.
    Broadcast = 0x02,
    /// Sockets with a full buffer miss the packet instead of failing the broadcast.
    Volatile = 0x04,
}

/// The selection of a broadcast. It crosses the wire between the servers of a cluster.
///
/// Without rooms and without the [`Broadcast`](BroadcastFlags::Broadcast) flag,
/// only `sid` is selected.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastOptions {
    flags: u8,
    /// Members of any of these rooms are selected.
    pub rooms: HashSet<Room>,
    /// Members of any of these rooms are left out.
    pub except: HashSet<Room>,
    /// The emitting socket.
    pub sid: Option<Sid>,
    /// Set when the selection is a single socket owned by this server.
    pub server_id: Option<Uid>,
}

impl BroadcastOptions {
    /// Selects `sid` alone, until rooms or flags are added.
    pub fn new(sid: Sid) -> Self {
        BroadcastOptions {
            sid: Some(sid),
            ..Self::default()
        }
    }

    /// Selects one socket of a given server.
    pub fn new_remote(data: &RemoteSocketData) -> Self {
        BroadcastOptions {
            server_id: Some(data.server_id),
            ..Self::new(data.id)
        }
    }

    /// Sets a flag. Setting it twice is harmless.
    pub fn add_flag(&mut self, flag: BroadcastFlags) {
        self.flags |= flag as u8;
    }

    /// Whether the flag was set.
    pub fn has_flag(&self, flag: BroadcastFlags) -> bool {
        self.flags & (flag as u8) != 0
    }
}
