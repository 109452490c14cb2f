//! The Node Runtime: a single-threaded, cooperative event loop that owns all
//! peer and group state and multiplexes every input source.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;
use std::io;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::beacon::BeaconDriver;
use crate::codec::{Payload, WireMessage};
use crate::command::Command;
use crate::config::NodeConfig;
use crate::event::{Event, PeerSnapshot};
use crate::group::GroupRegistry;
use crate::peer::Peer;

pub(crate) struct Runtime {
    pub identity: Uuid,
    pub identity_hex: String,
    pub config: NodeConfig,
    pub inbound_port: u16,
    pub local_ip: String,
    pub headers: HashMap<String, String>,
    pub status: u8,
    pub peers: HashMap<String, Peer>,
    pub groups: GroupRegistry,
    pub events_tx: mpsc::Sender<Event>,
    pub commands_rx: mpsc::Receiver<Command>,
    pub frames_rx: mpsc::Receiver<(String, WireMessage)>,
    pub errors_rx: mpsc::Receiver<io::Error>,
    pub beacon: BeaconDriver,
    pub quit_rx: oneshot::Receiver<()>,
    pub listener_handle: JoinHandle<()>,
}

impl Runtime {
    pub async fn run(mut self) {
        let mut beacon_signals: ReceiverStream<(SocketAddr, Bytes)> = self.beacon.signals();
        let mut ticker = tokio::time::interval(self.config.reap_interval);

        loop {
            tokio::select! {
                biased;

                _ = &mut self.quit_rx => {
                    info!(node = %self.identity_hex, "shutdown requested");
                    self.shutdown().await;
                    return;
                }

                cmd = self.commands_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            // Owner dropped the Node handle without calling
                            // disconnect(); treat it the same as a quit.
                            self.shutdown().await;
                            return;
                        }
                    }
                }

                Some((identity, msg)) = self.frames_rx.recv() => {
                    self.handle_frame(identity, msg).await;
                }

                Some((src, payload)) = beacon_signals.next() => {
                    self.handle_beacon(src, payload).await;
                }

                Some(err) = self.errors_rx.recv() => {
                    warn!(error = %err, "inbound transport error");
                }

                _ = ticker.tick() => {
                    self.reap().await;
                }
            }
        }
    }

    async fn emit(&mut self, event: Event) {
        if self.events_tx.send(event).await.is_err() {
            warn!(node = %self.identity_hex, "owner dropped event stream");
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Whisper { to, content } => {
                if let Some(peer) = self.peers.get_mut(&to) {
                    peer.send(&self.identity, Payload::Whisper { content }).await;
                }
            }
            Command::Shout { group, content } => {
                let members: Vec<String> = self.groups.members(&group).cloned().collect();
                for id in members {
                    if let Some(peer) = self.peers.get_mut(&id) {
                        peer.send(
                            &self.identity,
                            Payload::Shout {
                                group: group.clone(),
                                content: content.clone(),
                            },
                        )
                        .await;
                    }
                }
            }
            Command::Join { group } => {
                if self.groups.join_own(&group) {
                    self.status = self.status.wrapping_add(1);
                    let status = self.status;
                    for peer in self.peers.values_mut() {
                        peer.send(
                            &self.identity,
                            Payload::Join {
                                group: group.clone(),
                                status,
                            },
                        )
                        .await;
                    }
                }
            }
            Command::Leave { group } => {
                if self.groups.is_in_own(&group) {
                    self.status = self.status.wrapping_add(1);
                    let status = self.status;
                    for peer in self.peers.values_mut() {
                        peer.send(
                            &self.identity,
                            Payload::Leave {
                                group: group.clone(),
                                status,
                            },
                        )
                        .await;
                    }
                    self.groups.leave_own(&group);
                }
            }
            Command::Set { key, value } => {
                self.headers.insert(key, value);
            }
            Command::Get { key, reply } => {
                let _ = reply.send(self.headers.get(&key).cloned());
            }
            Command::PeerInfo { identity, reply } => {
                let snapshot = self.peers.get(&identity).map(|p| PeerSnapshot {
                    endpoint: p.endpoint.clone(),
                    ready: p.ready,
                    status: p.status,
                    headers: p.headers.clone(),
                });
                let _ = reply.send(snapshot);
            }
        }
    }

    async fn handle_frame(&mut self, identity: String, msg: WireMessage) {
        match &msg.payload {
            Payload::Hello { ip, mailbox, .. } => {
                self.require_peer(identity.clone(), ip.clone(), *mailbox).await;
                if let Some(peer) = self.peers.get_mut(&identity) {
                    peer.ready = true;
                }
            }
            _ => {
                let ready = self.peers.get(&identity).map(|p| p.ready).unwrap_or(false);
                if !ready {
                    warn!(peer = %identity, kind = msg.payload.kind_name(), "dropping message from unknown or not-ready peer");
                    return;
                }
            }
        }

        let seq_ok = match self.peers.get_mut(&identity) {
            Some(p) => p.check_message(msg.sequence),
            None => false,
        };
        if !seq_ok {
            warn!(peer = %identity, sequence = msg.sequence, "lost or reordered messages, dropping");
            return;
        }

        match msg.payload {
            Payload::Hello {
                status,
                groups,
                headers,
                ..
            } => {
                if let Some(peer) = self.peers.get_mut(&identity) {
                    peer.headers = headers;
                    peer.status = status;
                }
                for group in groups {
                    self.groups.join_peer(&group, &identity);
                }
            }
            Payload::Whisper { content } => {
                self.emit(Event::Whisper {
                    peer: identity.clone(),
                    content,
                })
                .await;
            }
            Payload::Shout { group, content } => {
                self.emit(Event::Shout {
                    peer: identity.clone(),
                    group,
                    content,
                })
                .await;
            }
            Payload::Ping => {
                if let Some(peer) = self.peers.get_mut(&identity) {
                    peer.send(&self.identity, Payload::PingOk).await;
                }
            }
            Payload::PingOk => {}
            Payload::Join { group, status } => {
                self.groups.join_peer(&group, &identity);
                self.emit(Event::Join {
                    peer: identity.clone(),
                    group,
                })
                .await;
                self.note_status(&identity, status);
            }
            Payload::Leave { group, status } => {
                self.groups.leave_peer(&group, &identity);
                self.emit(Event::Leave {
                    peer: identity.clone(),
                    group,
                })
                .await;
                self.note_status(&identity, status);
            }
        }

        if let Some(peer) = self.peers.get_mut(&identity) {
            peer.refresh(&self.config);
        }
    }

    fn note_status(&mut self, identity: &str, status: u8) {
        if let Some(peer) = self.peers.get_mut(identity) {
            if peer.status != status {
                warn!(peer = %identity, expected = peer.status, got = status, "peer status mismatch");
            }
            peer.status = status;
        }
    }

    async fn handle_beacon(&mut self, src: SocketAddr, payload: Bytes) {
        let Some(sig) = crate::beacon::BeaconSignature::decode(&payload) else {
            return;
        };
        let identity = crate::identity::to_hex(&sig.identity);
        self.require_peer(identity.clone(), src.ip().to_string(), sig.mailbox_port)
            .await;
        if let Some(peer) = self.peers.get_mut(&identity) {
            peer.refresh(&self.config);
        }
    }

    /// Ensure a peer record exists for `identity`, connecting to it and
    /// exchanging HELLO if this is the first time we've heard of it.
    async fn require_peer(&mut self, identity: String, host: String, port: u16) {
        if self.peers.contains_key(&identity) {
            return;
        }

        let endpoint = format!("{host}:{port}");

        let duplicates: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, p)| p.endpoint == endpoint)
            .map(|(id, _)| id.clone())
            .collect();
        for dup in duplicates {
            self.groups.remove_peer_everywhere(&dup);
            if let Some(mut old) = self.peers.remove(&dup) {
                old.disconnect();
            }
        }

        let mut peer = match Peer::connect(endpoint.clone(), &self.config).await {
            Ok(p) => p,
            Err(e) => {
                warn!(peer = %identity, endpoint = %endpoint, error = %e, "failed to connect to discovered peer");
                return;
            }
        };
        peer.refresh(&self.config);

        let hello = Payload::Hello {
            ip: self.local_ip.clone(),
            mailbox: self.inbound_port,
            status: self.status,
            groups: self.groups.own_groups().cloned().collect(),
            headers: self.headers.clone(),
        };
        peer.send(&self.identity, hello).await;

        let headers_known = peer.headers.clone();
        self.peers.insert(identity.clone(), peer);
        self.emit(Event::Enter {
            peer: identity,
            headers: headers_known,
            address: endpoint,
        })
        .await;
    }

    async fn reap(&mut self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut evasive = Vec::new();
        for (id, peer) in self.peers.iter() {
            if now >= peer.expired_at {
                expired.push(id.clone());
            } else if now >= peer.evasive_at {
                evasive.push(id.clone());
            }
        }

        for id in expired {
            self.groups.remove_peer_everywhere(&id);
            if let Some(mut peer) = self.peers.remove(&id) {
                peer.disconnect();
            }
            self.emit(Event::Exit { peer: id }).await;
        }

        for id in evasive {
            if let Some(peer) = self.peers.get_mut(&id) {
                peer.send(&self.identity, Payload::Ping).await;
            }
        }
    }

    async fn shutdown(&mut self) {
        let own_groups: Vec<String> = self.groups.own_groups().cloned().collect();
        for group in own_groups {
            self.groups.leave_own(&group);
        }

        let ids: Vec<String> = self.peers.keys().cloned().collect();
        for id in ids {
            if let Some(mut peer) = self.peers.remove(&id) {
                peer.disconnect();
            }
        }

        self.listener_handle.abort();
        info!(node = %self.identity_hex, "event loop drained");
    }
}
