//! Representation of sockets that may live on another server.
use serde::{Deserialize, Serialize};

use crate::{Sid, Str, Uid};

/// The data of a socket, as exchanged between servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSocketData {
    /// The socket id
    pub id: Sid,
    /// The server owning the socket
    pub server_id: Uid,
    /// The namespace of the socket
    pub ns: Str,
}

/// Replies gathered from the other servers of a cluster.
///
/// `expected` is the number of servers that should have answered. When fewer
/// replies are present, the request timed out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerReplies<T> {
    /// One entry per replying server
    pub replies: Vec<T>,
    /// Number of servers expected to answer
    pub expected: u16,
}

impl<T> ServerReplies<T> {
    /// Returns true if every expected server answered.
    pub fn is_complete(&self) -> bool {
        self.replies.len() >= self.expected as usize
    }

    /// Number of servers that did not answer in time.
    pub fn missing(&self) -> u16 {
        (self.expected as usize).saturating_sub(self.replies.len()) as u16
    }
}
