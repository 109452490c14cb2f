//! Per-remote-peer bookkeeping: endpoint, outbound connection, sequence
//! counters and liveness deadlines. The only component that knows per-peer
//! sequence state.

use std::collections::HashMap;
use std::time::Instant;

use futures::SinkExt;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedWrite, LengthDelimitedCodec};
use tracing::warn;
use uuid::Uuid;

use crate::codec::{self, Payload, WireMessage};
use crate::config::NodeConfig;
use crate::error::NodeError;

type Writer = FramedWrite<TcpStream, LengthDelimitedCodec>;

pub struct Peer {
    pub endpoint: String,
    pub ready: bool,
    pub status: u8,
    pub headers: HashMap<String, String>,
    sent_seq: u16,
    want_seq: u16,
    pub evasive_at: Instant,
    pub expired_at: Instant,
    writer: Option<Writer>,
}

impl Peer {
    /// Open an outbound framed socket to `endpoint`. Every message later
    /// written on this connection is prefixed with `local_identity`'s frame
    /// so the far side's ROUTER-style inbound socket knows the sender.
    pub async fn connect(endpoint: String, config: &NodeConfig) -> Result<Self, NodeError> {
        let stream = TcpStream::connect(&endpoint).await?;
        stream.set_nodelay(true).ok();
        let writer = FramedWrite::new(stream, LengthDelimitedCodec::new());
        let now = Instant::now();
        Ok(Self {
            endpoint,
            ready: false,
            status: 0,
            headers: HashMap::new(),
            sent_seq: 0,
            // First inbound message from a fresh peer is expected to carry
            // sequence 1 (sequence numbers start at 1).
            want_seq: 1,
            evasive_at: now + config.evasive_timeout,
            expired_at: now + config.expired_timeout,
            writer: Some(writer),
        })
    }

    /// Assign the next outbound sequence number, encode, and write. Silently
    /// drops the message if this peer's connection has already failed —
    /// that's a normal race (the peer may be about to expire).
    pub async fn send(&mut self, local_identity: &Uuid, payload: Payload) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };

        self.sent_seq = self.sent_seq.wrapping_add(1);
        let msg = WireMessage {
            sequence: self.sent_seq,
            payload,
        };

        let mut frames = vec![codec::identity_frame(local_identity)];
        frames.extend(codec::encode_message(&msg));

        for frame in frames {
            if let Err(e) = writer.send(frame).await {
                warn!(endpoint = %self.endpoint, error = %e, "peer write failed, disconnecting");
                self.writer = None;
                return;
            }
        }
    }

    /// Close the outbound socket and release it. Idempotent: dropping the
    /// framed writer drops the underlying `TcpStream`, closing the fd.
    pub fn disconnect(&mut self) {
        self.writer = None;
    }

    /// Returns true and advances `want_seq` iff `sequence` matches the
    /// expected next inbound sequence. On mismatch (loss/reorder) the peer
    /// is left connected; the caller discards the message.
    pub fn check_message(&mut self, sequence: u16) -> bool {
        if sequence == self.want_seq {
            self.want_seq = self.want_seq.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Push both liveness deadlines out from now, on any observed activity.
    pub fn refresh(&mut self, config: &NodeConfig) {
        let now = Instant::now();
        self.evasive_at = now + config.evasive_timeout;
        self.expired_at = now + config.expired_timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_peer() -> Peer {
        let now = Instant::now();
        Peer {
            endpoint: "127.0.0.1:1".into(),
            ready: true,
            status: 0,
            headers: HashMap::new(),
            sent_seq: 0,
            want_seq: 1,
            evasive_at: now,
            expired_at: now,
            writer: None,
        }
    }

    #[test]
    fn check_message_accepts_expected_and_advances() {
        let mut peer = bare_peer();
        assert!(peer.check_message(1));
        assert!(peer.check_message(2));
    }

    #[test]
    fn check_message_rejects_gap_without_advancing() {
        let mut peer = bare_peer();
        assert!(peer.check_message(1));
        // sequence 2 was lost; 3 arrives instead.
        assert!(!peer.check_message(3));
        // want_seq is still 2: the next correctly-sequenced message resumes.
        assert!(peer.check_message(2));
    }

    #[test]
    fn refresh_pushes_deadlines_forward() {
        let mut peer = bare_peer();
        let config = NodeConfig::default();
        let before = peer.expired_at;
        peer.refresh(&config);
        assert!(peer.expired_at > before);
    }
}
