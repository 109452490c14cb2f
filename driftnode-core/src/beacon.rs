//! UDP broadcast beacon: periodic presence announcement plus discovery of
//! other nodes announcing the same protocol tag.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::NodeError;

pub const SIGNATURE_LEN: usize = 22;
pub const PROTOCOL_TAG: [u8; 3] = *b"ZRE";
pub const PROTOCOL_VERSION: u8 = 1;

const BROADCAST_ADDR: &str = "255.255.255.255";
const MAX_DATAGRAM: usize = 1024;

/// The 22-byte payload broadcast to advertise this node's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeaconSignature {
    pub identity: Uuid,
    pub mailbox_port: u16,
}

impl BeaconSignature {
    pub fn encode(&self) -> [u8; SIGNATURE_LEN] {
        let mut buf = [0u8; SIGNATURE_LEN];
        buf[0..3].copy_from_slice(&PROTOCOL_TAG);
        buf[3] = PROTOCOL_VERSION;
        buf[4..20].copy_from_slice(self.identity.as_bytes());
        buf[20..22].copy_from_slice(&self.mailbox_port.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != SIGNATURE_LEN {
            return None;
        }
        if buf[0..3] != PROTOCOL_TAG {
            return None;
        }
        if buf[3] != PROTOCOL_VERSION {
            return None;
        }
        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(&buf[4..20]);
        let mailbox_port = u16::from_be_bytes([buf[20], buf[21]]);
        Some(BeaconSignature {
            identity: Uuid::from_bytes(id_bytes),
            mailbox_port,
        })
    }
}

/// Drives UDP broadcast discovery: one background task receiving datagrams,
/// one periodic task (once [`BeaconDriver::publish`] is called) broadcasting
/// this node's own signature.
pub struct BeaconDriver {
    local_addr: IpAddr,
    port: u16,
    interval: std::time::Duration,
    socket: Arc<UdpSocket>,
    filter: Arc<StdMutex<Vec<u8>>>,
    published: Arc<StdMutex<Option<Vec<u8>>>>,
    signals_rx: AsyncMutex<Option<mpsc::Receiver<(SocketAddr, Bytes)>>>,
    recv_handle: JoinHandle<()>,
    publish_handle: StdMutex<Option<JoinHandle<()>>>,
}

impl BeaconDriver {
    /// Bind a UDP broadcast socket on `port` and start the receive loop.
    /// No filtering or publishing happens until [`BeaconDriver::subscribe`]
    /// and [`BeaconDriver::publish`] are called. `interval` sets this node's
    /// own broadcast cadence once `publish` is called.
    pub async fn new(port: u16, interval: std::time::Duration) -> Result<Self, NodeError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|e| NodeError::Beacon(format!("bind {port}: {e}")))?;
        socket
            .set_broadcast(true)
            .map_err(|e| NodeError::Beacon(format!("enable broadcast: {e}")))?;
        let socket = Arc::new(socket);

        let local_addr = local_ip_address::local_ip()
            .map_err(|e| NodeError::Beacon(format!("determine local address: {e}")))?;

        let filter: Arc<StdMutex<Vec<u8>>> = Arc::new(StdMutex::new(Vec::new()));
        let published: Arc<StdMutex<Option<Vec<u8>>>> = Arc::new(StdMutex::new(None));
        let (tx, rx) = mpsc::channel(128);

        let recv_handle = tokio::spawn(recv_loop(
            Arc::clone(&socket),
            tx,
            Arc::clone(&filter),
            Arc::clone(&published),
        ));

        Ok(Self {
            local_addr,
            port,
            interval,
            socket,
            filter,
            published,
            signals_rx: AsyncMutex::new(Some(rx)),
            recv_handle,
            publish_handle: StdMutex::new(None),
        })
    }

    /// Local IP address used in this node's outgoing HELLO/beacon payloads.
    pub fn addr(&self) -> IpAddr {
        self.local_addr
    }

    /// Restrict delivered signals to those whose payload begins with `prefix`.
    pub fn subscribe(&self, prefix: Vec<u8>) {
        *self.filter.lock().unwrap() = prefix;
    }

    /// Begin (or replace) periodic broadcast of `payload` at the configured cadence.
    pub fn publish(&self, payload: Vec<u8>) {
        *self.published.lock().unwrap() = Some(payload.clone());
        let mut guard = self.publish_handle.lock().unwrap();
        if let Some(old) = guard.take() {
            old.abort();
        }
        let socket = Arc::clone(&self.socket);
        let port = self.port;
        let interval = self.interval;
        *guard = Some(tokio::spawn(publish_loop(socket, payload, port, interval)));
    }

    /// Take the lazy sequence of received `(source, payload)` beacon signals.
    /// Callable exactly once; panics on a second call.
    pub fn signals(&self) -> ReceiverStream<(SocketAddr, Bytes)> {
        let rx = self
            .signals_rx
            .try_lock()
            .expect("signals() must not be called concurrently")
            .take()
            .expect("signals() already consumed");
        ReceiverStream::new(rx)
    }
}

impl Drop for BeaconDriver {
    fn drop(&mut self) {
        self.recv_handle.abort();
        if let Some(handle) = self.publish_handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<(SocketAddr, Bytes)>,
    filter: Arc<StdMutex<Vec<u8>>>,
    published: Arc<StdMutex<Option<Vec<u8>>>>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "beacon recv error");
                continue;
            }
        };
        let payload = &buf[..len];

        if let Some(own) = published.lock().unwrap().as_ref() {
            if own.as_slice() == payload {
                trace!("suppressed local echo of own beacon");
                continue;
            }
        }

        let prefix = filter.lock().unwrap().clone();
        if !payload.starts_with(&prefix) {
            continue;
        }

        if tx.send((src, Bytes::copy_from_slice(payload))).await.is_err() {
            return;
        }
    }
}

async fn publish_loop(socket: Arc<UdpSocket>, payload: Vec<u8>, port: u16, cadence: std::time::Duration) {
    let dest: SocketAddr = format!("{BROADCAST_ADDR}:{port}")
        .parse()
        .expect("broadcast address is well-formed");
    let mut interval = tokio::time::interval(cadence);
    loop {
        interval.tick().await;
        if let Err(e) = socket.send_to(&payload, dest).await {
            warn!(error = %e, "beacon publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_roundtrips() {
        let sig = BeaconSignature {
            identity: Uuid::new_v4(),
            mailbox_port: 49200,
        };
        let encoded = sig.encode();
        assert_eq!(encoded.len(), SIGNATURE_LEN);
        let decoded = BeaconSignature::decode(&encoded).unwrap();
        assert_eq!(decoded, sig);
    }

    #[test]
    fn rejects_wrong_tag() {
        let mut buf = [0u8; SIGNATURE_LEN];
        buf[0..3].copy_from_slice(b"XXX");
        buf[3] = PROTOCOL_VERSION;
        assert!(BeaconSignature::decode(&buf).is_none());
    }

    #[test]
    fn rejects_wrong_version() {
        let mut sig = BeaconSignature {
            identity: Uuid::new_v4(),
            mailbox_port: 1,
        }
        .encode();
        sig[3] = 9;
        assert!(BeaconSignature::decode(&sig).is_none());
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(BeaconSignature::decode(&[0u8; 10]).is_none());
    }
}
