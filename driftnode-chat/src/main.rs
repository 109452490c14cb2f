use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use driftnode_core::{Event, Node, NodeConfig};

/// Interactive chat over the LAN discovery node.
///
/// Lines typed at the prompt are SHOUTed to the joined group by default.
/// Prefix a line with a command to do something else:
///   /join <group>
///   /leave <group>
///   /whisper <identity> <message>
///   /name <value>        set the "name" header advertised to peers
///   /quit
#[derive(Parser)]
#[command(name = "driftnode-chat", about = "LAN chat over driftnode-core")]
struct Args {
    /// Group to join on startup.
    #[arg(long, default_value = "lobby")]
    group: String,

    /// Display name advertised to peers via the "name" header.
    #[arg(long, default_value = "anonymous")]
    name: String,

    /// UDP port used for presence beacons.
    #[arg(long)]
    beacon_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("driftnode_chat=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let mut config = NodeConfig::default();
    if let Some(port) = args.beacon_port {
        config.beacon_port = port;
    }

    let (node, mut events) = Node::new(config).await?;
    tracing::info!(identity = %node.identity(), "node started");

    node.set("name", args.name.clone()).await;
    node.join(args.group.clone()).await;
    println!("joined '{}' as {} ({})", args.group, args.name, node.identity());

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&node, &args.group, &line).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = events.recv() => {
                match event {
                    Some(event) => print_event(&event),
                    None => {
                        println!("node runtime exited");
                        break;
                    }
                }
            }
        }
    }

    node.disconnect().await;
    Ok(())
}

/// Returns `false` when the caller should stop the input loop.
async fn handle_line(node: &Node, default_group: &str, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    if let Some(rest) = line.strip_prefix("/join ") {
        node.join(rest.trim().to_string()).await;
    } else if let Some(rest) = line.strip_prefix("/leave ") {
        node.leave(rest.trim().to_string()).await;
    } else if let Some(rest) = line.strip_prefix("/whisper ") {
        match rest.trim().split_once(' ') {
            Some((to, msg)) => node.whisper(to.to_string(), msg.to_string().into_bytes()).await,
            None => println!("usage: /whisper <identity> <message>"),
        }
    } else if let Some(rest) = line.strip_prefix("/name ") {
        node.set("name", rest.trim().to_string()).await;
    } else if line == "/quit" {
        return false;
    } else {
        node.shout(default_group.to_string(), line.to_string().into_bytes()).await;
    }
    true
}

fn print_event(event: &Event) {
    match event {
        Event::Enter { peer, address, .. } => println!("* {peer} entered ({address})"),
        Event::Exit { peer } => println!("* {peer} exited"),
        Event::Whisper { peer, content } => {
            println!("[{peer}] {}", String::from_utf8_lossy(content));
        }
        Event::Shout { peer, group, content } => {
            println!("[{group}] {peer}: {}", String::from_utf8_lossy(content));
        }
        Event::Join { peer, group } => println!("* {peer} joined {group}"),
        Event::Leave { peer, group } => println!("* {peer} left {group}"),
    }
}
