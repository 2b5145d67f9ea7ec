//! Minimal standalone node: joins a network through a switchboard, logs
//! every event, and rebroadcasts any chat message it receives under a
//! distinct app id so you can watch gossip propagate across more than one
//! process on the same machine.

use clap::Parser;
use meshnet_core::{Event, Identity, NodeCore, NodeOpts, PartialMessage, SigningKey};

#[derive(Parser)]
#[command(author, version, about = "Run a single meshnet-core node")]
struct Args {
    /// Network to join; only nodes sharing this id will connect.
    #[arg(long, default_value = "demo-network")]
    network_id: String,

    /// Switchboard rendezvous endpoint.
    #[arg(long, default_value = "http://localhost:8787/switchboard")]
    switch_address: String,

    /// 64-char hex seed for a stable, signed identity. Omit to run unsigned.
    #[arg(long)]
    seed: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let identity = match args.seed {
        Some(hex_seed) => {
            let bytes = hex::decode(&hex_seed).expect("--seed must be hex");
            let seed: [u8; 32] = bytes.try_into().expect("--seed must decode to 32 bytes");
            Identity::Signed(SigningKey::from_seed(&seed).expect("invalid seed"))
        }
        None => Identity::Unsigned(uuid::Uuid::new_v4().to_string()),
    };

    let node = NodeCore::new(NodeOpts {
        network_id: args.network_id,
        switch_address: args.switch_address,
        identity,
        config: meshnet_core::config::Config::default(),
    })
    .expect("failed to start node");

    node.on(|event: &Event| match event {
        Event::AddConnection { id, address } => {
            log::info!("connection {id} open to {address:?}");
        }
        Event::DestroyConnection { id, address } => {
            log::info!("connection {id} closed ({address:?})");
        }
        Event::Message(message) => {
            log::info!("{} ({}): {}", message.address, message.app_id, message.data);
        }
        Event::BadMessage { from, reason } => {
            log::warn!("dropped a message from {from:?}: {reason}");
        }
        Event::ConnectionError { id, error } => {
            log::warn!("connection {id} error: {error}");
        }
        _ => {}
    })
    .await;

    let _ = node
        .broadcast(PartialMessage::app("chat", "text", serde_json::json!({"body": "hello mesh"})))
        .await;

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    node.teardown().await;
}
