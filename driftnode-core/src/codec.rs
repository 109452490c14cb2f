//! Wire codec for peer-to-peer messages.
//!
//! Every message is a sequence of length-prefixed frames carried over a
//! [`tokio_util::codec::LengthDelimitedCodec`]-framed stream: frame 1 is a
//! single protocol-signature byte, frame 2 is the message-kind discriminator,
//! frame 3 is the big-endian 16-bit sequence number, and the rest are
//! kind-specific. A leading 17-byte identity frame (routing marker + 16-byte
//! UUID) precedes every message on the inbound side, mirroring a ZeroMQ
//! ROUTER socket's automatic identity prefixing.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::Stream;
use futures::StreamExt;
use uuid::Uuid;

use crate::error::CodecError;

pub const PROTOCOL_SIGNATURE: u8 = 0xA5;
pub const ROUTING_MARKER: u8 = 0x00;
pub const IDENTITY_FRAME_LEN: usize = 17;

pub const KIND_HELLO: u8 = 1;
pub const KIND_WHISPER: u8 = 2;
pub const KIND_SHOUT: u8 = 3;
pub const KIND_JOIN: u8 = 4;
pub const KIND_LEAVE: u8 = 5;
pub const KIND_PING: u8 = 6;
pub const KIND_PING_OK: u8 = 7;

/// Message body without a sequence number. `Clone`-able so that group
/// fan-out can hand one independent copy to each member peer, which then
/// stamps its own sequence number at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Hello {
        ip: String,
        mailbox: u16,
        status: u8,
        groups: Vec<String>,
        headers: HashMap<String, String>,
    },
    Whisper {
        content: Bytes,
    },
    Shout {
        group: String,
        content: Bytes,
    },
    Join {
        group: String,
        status: u8,
    },
    Leave {
        group: String,
        status: u8,
    },
    Ping,
    PingOk,
}

impl Payload {
    pub fn kind(&self) -> u8 {
        match self {
            Payload::Hello { .. } => KIND_HELLO,
            Payload::Whisper { .. } => KIND_WHISPER,
            Payload::Shout { .. } => KIND_SHOUT,
            Payload::Join { .. } => KIND_JOIN,
            Payload::Leave { .. } => KIND_LEAVE,
            Payload::Ping => KIND_PING,
            Payload::PingOk => KIND_PING_OK,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Payload::Hello { .. } => "HELLO",
            Payload::Whisper { .. } => "WHISPER",
            Payload::Shout { .. } => "SHOUT",
            Payload::Join { .. } => "JOIN",
            Payload::Leave { .. } => "LEAVE",
            Payload::Ping => "PING",
            Payload::PingOk => "PING-OK",
        }
    }
}

/// A fully sequenced message, ready to encode or just decoded off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub sequence: u16,
    pub payload: Payload,
}

/// The 17-byte ROUTER identity frame prepended ahead of every message an
/// outbound `Peer` connection writes.
pub fn identity_frame(identity: &Uuid) -> Bytes {
    let mut buf = BytesMut::with_capacity(IDENTITY_FRAME_LEN);
    buf.put_u8(ROUTING_MARKER);
    buf.extend_from_slice(identity.as_bytes());
    buf.freeze()
}

/// Strip the routing marker from a received 17-byte identity frame, yielding
/// the sender's raw 16-byte identity.
pub fn parse_identity_frame(frame: &[u8]) -> Result<Uuid, CodecError> {
    if frame.len() != IDENTITY_FRAME_LEN {
        return Err(CodecError::BadIdentityFrame(frame.len()));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&frame[1..]);
    Ok(Uuid::from_bytes(bytes))
}

fn string_frame(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn u16_frame(v: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u16(v);
    buf.freeze()
}

fn u8_frame(v: u8) -> Bytes {
    Bytes::copy_from_slice(&[v])
}

/// Encode a sequenced message into the ordered list of frames to write.
pub fn encode_message(msg: &WireMessage) -> Vec<Bytes> {
    let mut frames = vec![
        Bytes::copy_from_slice(&[PROTOCOL_SIGNATURE]),
        Bytes::copy_from_slice(&[msg.payload.kind()]),
        u16_frame(msg.sequence),
    ];
    match &msg.payload {
        Payload::Hello {
            ip,
            mailbox,
            status,
            groups,
            headers,
        } => {
            frames.push(string_frame(ip));
            frames.push(u16_frame(*mailbox));
            frames.push(u8_frame(*status));
            frames.push(u16_frame(groups.len() as u16));
            for g in groups {
                frames.push(string_frame(g));
            }
            frames.push(u16_frame(headers.len() as u16));
            for (k, v) in headers {
                frames.push(string_frame(k));
                frames.push(string_frame(v));
            }
        }
        Payload::Whisper { content } => {
            frames.push(content.clone());
        }
        Payload::Shout { group, content } => {
            frames.push(string_frame(group));
            frames.push(content.clone());
        }
        Payload::Join { group, status } | Payload::Leave { group, status } => {
            frames.push(string_frame(group));
            frames.push(u8_frame(*status));
        }
        Payload::Ping | Payload::PingOk => {}
    }
    frames
}

async fn next_frame<S>(source: &mut S) -> Result<BytesMut, CodecError>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Unpin,
{
    match source.next().await {
        Some(Ok(frame)) => Ok(frame),
        Some(Err(_)) | None => Err(CodecError::Truncated),
    }
}

async fn next_string<S>(source: &mut S) -> Result<String, CodecError>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Unpin,
{
    let frame = next_frame(source).await?;
    Ok(String::from_utf8(frame.to_vec())?)
}

async fn next_u16<S>(source: &mut S) -> Result<u16, CodecError>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Unpin,
{
    let mut frame = next_frame(source).await?;
    if frame.len() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(frame.get_u16())
}

async fn next_u8<S>(source: &mut S) -> Result<u8, CodecError>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Unpin,
{
    let frame = next_frame(source).await?;
    if frame.is_empty() {
        return Err(CodecError::Truncated);
    }
    Ok(frame[0])
}

/// Read the leading 17-byte ROUTER identity frame for one message.
/// Returns `Ok(None)` when the stream ended cleanly between messages.
pub async fn read_identity<S>(source: &mut S) -> Result<Option<Uuid>, CodecError>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Unpin,
{
    match source.next().await {
        None => Ok(None),
        Some(Err(_)) => Ok(None),
        Some(Ok(frame)) => parse_identity_frame(&frame).map(Some),
    }
}

/// Decode one full message (protocol signature through kind-specific frames)
/// from a frame stream, after the identity frame has already been consumed.
pub async fn read_message<S>(source: &mut S) -> Result<WireMessage, CodecError>
where
    S: Stream<Item = std::io::Result<BytesMut>> + Unpin,
{
    let sig = next_frame(source).await?;
    if sig.len() != 1 || sig[0] != PROTOCOL_SIGNATURE {
        return Err(CodecError::BadSignature(sig.first().copied().unwrap_or(0)));
    }
    let kind = next_u8(source).await?;
    let sequence = next_u16(source).await?;

    let payload = match kind {
        KIND_HELLO => {
            let ip = next_string(source).await?;
            let mailbox = next_u16(source).await?;
            let status = next_u8(source).await?;
            let group_count = next_u16(source).await?;
            let mut groups = Vec::with_capacity(group_count as usize);
            for _ in 0..group_count {
                groups.push(next_string(source).await?);
            }
            let header_count = next_u16(source).await?;
            let mut headers = HashMap::with_capacity(header_count as usize);
            for _ in 0..header_count {
                let k = next_string(source).await?;
                let v = next_string(source).await?;
                headers.insert(k, v);
            }
            Payload::Hello {
                ip,
                mailbox,
                status,
                groups,
                headers,
            }
        }
        KIND_WHISPER => {
            let content = next_frame(source).await?.freeze();
            Payload::Whisper { content }
        }
        KIND_SHOUT => {
            let group = next_string(source).await?;
            let content = next_frame(source).await?.freeze();
            Payload::Shout { group, content }
        }
        KIND_JOIN => {
            let group = next_string(source).await?;
            let status = next_u8(source).await?;
            Payload::Join { group, status }
        }
        KIND_LEAVE => {
            let group = next_string(source).await?;
            let status = next_u8(source).await?;
            Payload::Leave { group, status }
        }
        KIND_PING => Payload::Ping,
        KIND_PING_OK => Payload::PingOk,
        other => return Err(CodecError::UnknownKind(other)),
    };

    Ok(WireMessage { sequence, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frame_stream(frames: Vec<Bytes>) -> impl Stream<Item = std::io::Result<BytesMut>> + Unpin {
        stream::iter(frames.into_iter().map(|b| Ok(BytesMut::from(&b[..]))))
    }

    async fn roundtrip(msg: WireMessage) {
        let frames = encode_message(&msg);
        let mut src = frame_stream(frames);
        let decoded = read_message(&mut src).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn hello_roundtrips() {
        let mut headers = HashMap::new();
        headers.insert("name".to_string(), "alice".to_string());
        roundtrip(WireMessage {
            sequence: 1,
            payload: Payload::Hello {
                ip: "192.168.1.5".into(),
                mailbox: 49152,
                status: 3,
                groups: vec!["chat".into(), "dev".into()],
                headers,
            },
        })
        .await;
    }

    #[tokio::test]
    async fn whisper_roundtrips() {
        roundtrip(WireMessage {
            sequence: 42,
            payload: Payload::Whisper {
                content: Bytes::from_static(b"hello there"),
            },
        })
        .await;
    }

    #[tokio::test]
    async fn shout_roundtrips() {
        roundtrip(WireMessage {
            sequence: 7,
            payload: Payload::Shout {
                group: "chat".into(),
                content: Bytes::from_static(b"hi all"),
            },
        })
        .await;
    }

    #[tokio::test]
    async fn join_and_leave_roundtrip() {
        roundtrip(WireMessage {
            sequence: 2,
            payload: Payload::Join {
                group: "chat".into(),
                status: 1,
            },
        })
        .await;
        roundtrip(WireMessage {
            sequence: 3,
            payload: Payload::Leave {
                group: "chat".into(),
                status: 2,
            },
        })
        .await;
    }

    #[tokio::test]
    async fn ping_and_ping_ok_roundtrip() {
        roundtrip(WireMessage {
            sequence: 1,
            payload: Payload::Ping,
        })
        .await;
        roundtrip(WireMessage {
            sequence: 2,
            payload: Payload::PingOk,
        })
        .await;
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let frames = vec![
            Bytes::copy_from_slice(&[0xFF]),
            Bytes::copy_from_slice(&[KIND_PING]),
            u16_frame(1),
        ];
        let mut src = frame_stream(frames);
        assert_eq!(
            read_message(&mut src).await,
            Err(CodecError::BadSignature(0xFF))
        );
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let frames = vec![
            Bytes::copy_from_slice(&[PROTOCOL_SIGNATURE]),
            Bytes::copy_from_slice(&[99]),
            u16_frame(1),
        ];
        let mut src = frame_stream(frames);
        assert_eq!(read_message(&mut src).await, Err(CodecError::UnknownKind(99)));
    }

    #[test]
    fn identity_frame_roundtrips() {
        let id = Uuid::new_v4();
        let frame = identity_frame(&id);
        assert_eq!(frame.len(), IDENTITY_FRAME_LEN);
        let parsed = parse_identity_frame(&frame).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn identity_frame_rejects_bad_length() {
        assert_eq!(
            parse_identity_frame(&[0u8; 5]),
            Err(CodecError::BadIdentityFrame(5))
        );
    }
}
