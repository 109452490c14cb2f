//! Error taxonomy. Only construction-time failures are surfaced to callers;
//! everything recoverable inside the event loop stays local (logged via `tracing`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("no available port in dynamic range {0:#06x}..={1:#06x}")]
    NoAvailablePort(u16, u16),

    #[error("beacon driver initialization failed: {0}")]
    Beacon(String),

    #[error("event loop is no longer running")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame stream ended before a complete message was read")]
    Truncated,

    #[error("bad protocol signature byte {0:#04x}")]
    BadSignature(u8),

    #[error("unknown message kind {0}")]
    UnknownKind(u8),

    #[error("frame was not valid utf-8")]
    InvalidUtf8,

    #[error("identity frame had wrong length: expected 17 bytes, got {0}")]
    BadIdentityFrame(usize),
}

impl From<std::string::FromUtf8Error> for CodecError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        CodecError::InvalidUtf8
    }
}
