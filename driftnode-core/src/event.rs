//! The event stream delivered to the node's owner.

use std::collections::HashMap;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Delivered exactly once before any other event mentioning this peer.
    Enter {
        peer: String,
        headers: HashMap<String, String>,
        address: String,
    },
    /// Delivered exactly once after the last event mentioning this peer.
    Exit { peer: String },
    Whisper { peer: String, content: Bytes },
    Shout {
        peer: String,
        group: String,
        content: Bytes,
    },
    Join { peer: String, group: String },
    Leave { peer: String, group: String },
}

impl Event {
    pub fn peer(&self) -> &str {
        match self {
            Event::Enter { peer, .. }
            | Event::Exit { peer }
            | Event::Whisper { peer, .. }
            | Event::Shout { peer, .. }
            | Event::Join { peer, .. }
            | Event::Leave { peer, .. } => peer,
        }
    }
}

/// Point-in-time view of a peer, returned by the `peer_info` lookup so that
/// callers can see headers/address that weren't yet known at `ENTER` time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub endpoint: String,
    pub ready: bool,
    pub status: u8,
    pub headers: HashMap<String, String>,
}
