//! Commands accepted from the node's owner.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::event::PeerSnapshot;

#[derive(Debug)]
pub enum Command {
    Whisper { to: String, content: Bytes },
    Shout { group: String, content: Bytes },
    Join { group: String },
    Leave { group: String },
    Set { key: String, value: String },
    Get {
        key: String,
        reply: oneshot::Sender<Option<String>>,
    },
    PeerInfo {
        identity: String,
        reply: oneshot::Sender<Option<PeerSnapshot>>,
    },
}
