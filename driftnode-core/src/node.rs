//! Public node API: construction, commands, and the owner-facing event stream.

use std::collections::HashMap;

use bytes::Bytes;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::beacon::{BeaconDriver, BeaconSignature, PROTOCOL_TAG};
use crate::codec::{self, WireMessage};
use crate::command::Command;
use crate::config::{NodeConfig, DYNAMIC_PORT_HIGH, DYNAMIC_PORT_LOW};
use crate::error::NodeError;
use crate::event::{Event, PeerSnapshot};
use crate::group::GroupRegistry;
use crate::identity;
use crate::runtime::Runtime;

/// A running node. Cheaply cloneable handles aren't provided — a single
/// owner drives commands and drains the paired [`EventStream`].
pub struct Node {
    identity: String,
    commands: mpsc::Sender<Command>,
    quit: Mutex<Option<oneshot::Sender<()>>>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

/// The owner-facing half of the event channel.
pub struct EventStream(mpsc::Receiver<Event>);

impl EventStream {
    pub async fn recv(&mut self) -> Option<Event> {
        self.0.recv().await
    }
}

impl Node {
    /// Bind the inbound socket and beacon, then spawn the event loop.
    pub async fn new(config: NodeConfig) -> Result<(Node, EventStream), NodeError> {
        let identity = identity::generate();
        let identity_hex = identity::to_hex(&identity);

        let (listener, inbound_port) = bind_dynamic_port().await?;

        let (frames_tx, frames_rx) = mpsc::channel(256);
        let (errors_tx, errors_rx) = mpsc::channel(32);
        let listener_handle = tokio::spawn(accept_loop(listener, frames_tx, errors_tx));

        let beacon = BeaconDriver::new(config.beacon_port, config.beacon_interval).await?;
        let local_ip = beacon.addr().to_string();
        beacon.subscribe(PROTOCOL_TAG.to_vec());
        let signature = BeaconSignature {
            identity,
            mailbox_port: inbound_port,
        };
        beacon.publish(signature.encode().to_vec());

        let (commands_tx, commands_rx) = mpsc::channel(64);
        // Capacity 1 is the closest tokio equivalent to an unbuffered
        // channel: the loop blocks on emit() until the owner consumes.
        let (events_tx, events_rx) = mpsc::channel(1);
        let (quit_tx, quit_rx) = oneshot::channel();

        info!(node = %identity_hex, port = inbound_port, "node started");

        let runtime = Runtime {
            identity,
            identity_hex: identity_hex.clone(),
            config,
            inbound_port,
            local_ip,
            headers: HashMap::new(),
            status: 0,
            peers: HashMap::new(),
            groups: GroupRegistry::default(),
            events_tx,
            commands_rx,
            frames_rx,
            errors_rx,
            beacon,
            quit_rx,
            listener_handle,
        };
        let join_handle = tokio::spawn(runtime.run());

        let node = Node {
            identity: identity_hex,
            commands: commands_tx,
            quit: Mutex::new(Some(quit_tx)),
            join_handle: Mutex::new(Some(join_handle)),
        };

        Ok((node, EventStream(events_rx)))
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn whisper(&self, identity: impl Into<String>, content: impl Into<Bytes>) {
        let _ = self
            .commands
            .send(Command::Whisper {
                to: identity.into(),
                content: content.into(),
            })
            .await;
    }

    pub async fn shout(&self, group: impl Into<String>, content: impl Into<Bytes>) {
        let _ = self
            .commands
            .send(Command::Shout {
                group: group.into(),
                content: content.into(),
            })
            .await;
    }

    pub async fn join(&self, group: impl Into<String>) {
        let _ = self.commands.send(Command::Join { group: group.into() }).await;
    }

    pub async fn leave(&self, group: impl Into<String>) {
        let _ = self.commands.send(Command::Leave { group: group.into() }).await;
    }

    pub async fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self
            .commands
            .send(Command::Set {
                key: key.into(),
                value: value.into(),
            })
            .await;
    }

    pub async fn get(&self, key: impl Into<String>) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Get {
                key: key.into(),
                reply,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn peer_info(&self, identity: impl Into<String>) -> Option<PeerSnapshot> {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::PeerInfo {
                identity: identity.into(),
                reply,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Signal the event loop to shut down and wait for it to drain.
    pub async fn disconnect(&self) {
        if let Some(tx) = self.quit.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

async fn bind_dynamic_port() -> Result<(TcpListener, u16), NodeError> {
    let span = (DYNAMIC_PORT_HIGH - DYNAMIC_PORT_LOW) as u32 + 1;
    let start = rand::thread_rng().gen_range(0..span);
    for offset in 0..span {
        let port = DYNAMIC_PORT_LOW + ((start + offset) % span) as u16;
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(_) => continue,
        }
    }
    Err(NodeError::NoAvailablePort(DYNAMIC_PORT_LOW, DYNAMIC_PORT_HIGH))
}

async fn accept_loop(
    listener: TcpListener,
    frames_tx: mpsc::Sender<(String, WireMessage)>,
    errors_tx: mpsc::Sender<std::io::Error>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let frames_tx = frames_tx.clone();
                tokio::spawn(handle_connection(stream, frames_tx));
            }
            Err(e) => {
                if errors_tx.send(e).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Read one ROUTER-style identity-prefixed message at a time off an accepted
/// connection, forwarding decoded messages to the runtime. A framing error
/// ends only this connection's task; the listener keeps accepting others.
async fn handle_connection(stream: TcpStream, frames_tx: mpsc::Sender<(String, WireMessage)>) {
    let mut reader = FramedRead::new(stream, LengthDelimitedCodec::new());
    loop {
        let identity = match codec::read_identity(&mut reader).await {
            Ok(Some(id)) => identity::to_hex(&id),
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "bad identity frame, closing connection");
                return;
            }
        };

        match codec::read_message(&mut reader).await {
            Ok(msg) => {
                if frames_tx.send((identity, msg)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(peer = %identity, error = %e, "unparseable peer frame, dropped");
                continue;
            }
        }
    }
}
