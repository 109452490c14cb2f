use std::time::Duration;

use driftnode_core::{Event, Node, NodeConfig};
use tokio::time::timeout;

fn config_on_port(beacon_port: u16) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.beacon_port = beacon_port;
    config
}

#[tokio::test]
async fn node_starts_and_disconnects_cleanly() {
    let (node, _events) = Node::new(config_on_port(15670)).await.expect("node starts");
    assert_eq!(node.identity().len(), 32);
    timeout(Duration::from_secs(2), node.disconnect())
        .await
        .expect("disconnect does not hang");
}

#[tokio::test]
async fn header_get_set_roundtrip() {
    let (node, _events) = Node::new(config_on_port(15671)).await.expect("node starts");
    assert_eq!(node.get("name").await, None);
    node.set("name", "alice").await;
    assert_eq!(node.get("name").await, Some("alice".to_string()));
    node.disconnect().await;
}

#[tokio::test]
async fn peer_info_for_unknown_identity_is_none() {
    let (node, _events) = Node::new(config_on_port(15672)).await.expect("node starts");
    assert_eq!(node.peer_info("DOESNOTEXIST").await, None);
    node.disconnect().await;
}

#[tokio::test]
async fn whisper_to_unknown_identity_is_silently_dropped() {
    let (node, _events) = Node::new(config_on_port(15673)).await.expect("node starts");
    // Not connected to anyone; this must not panic or block.
    node.whisper("DOESNOTEXIST", b"hello".to_vec()).await;
    node.disconnect().await;
}

/// Two nodes sharing a beacon port discover each other, exchange group
/// membership, and can SHOUT to one another. Relies on UDP broadcast
/// delivery between processes on the same host.
#[tokio::test]
async fn two_nodes_discover_join_and_shout() {
    let config = config_on_port(15674);
    let (alice, mut alice_events) = Node::new(config.clone()).await.expect("alice starts");
    let (bob, mut bob_events) = Node::new(config).await.expect("bob starts");

    alice.join("lobby").await;
    bob.join("lobby").await;

    // Wait for alice to see bob ENTER.
    let bob_id = timeout(Duration::from_secs(10), async {
        loop {
            match alice_events.recv().await {
                Some(Event::Enter { peer, .. }) => return peer,
                Some(_) => continue,
                None => panic!("alice event stream closed early"),
            }
        }
    })
    .await
    .expect("alice sees bob enter");

    bob.shout("lobby", b"hi from bob".to_vec()).await;

    let received = timeout(Duration::from_secs(10), async {
        loop {
            match alice_events.recv().await {
                Some(Event::Shout { peer, group, content }) if peer == bob_id && group == "lobby" => {
                    return content.to_vec();
                }
                Some(_) => continue,
                None => panic!("alice event stream closed early"),
            }
        }
    })
    .await
    .expect("alice receives bob's shout");

    assert_eq!(received, b"hi from bob".to_vec());

    drop(bob_events);
    alice.disconnect().await;
    bob.disconnect().await;
}
