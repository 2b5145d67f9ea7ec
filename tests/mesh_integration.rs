//! End-to-end tests driving two or more `NodeCore`s against a fake
//! switchboard over the loopback transport (spec §8's testable
//! properties, exercised the way an embedder actually would: through the
//! public API, not by reaching into `CoreState`).

mod common;

use common::FakeSwitchboard;
use meshnet_core::transport::loopback::LoopbackNetwork;
use meshnet_core::{config::Config, Event, Identity, Message, NodeCore, NodeOpts, PartialMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

fn fast_config(max_connections: usize) -> Config {
    Config {
        presence_broadcast_interval_ms: 30,
        fast_switchboard_request_interval_ms: 20,
        slow_switchboard_request_interval_ms: 200,
        garbage_collect_interval_ms: 50,
        max_message_rate_before_rude: None,
        max_connections,
        memory_duration_ms: 60_000,
        message_ttl_max: 6,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F, timeout_ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn two_nodes_discover_and_exchange_a_message() {
    let switchboard = FakeSwitchboard::start().await;
    // Both nodes must share one loopback network so their offer/answer
    // labels resolve against the same pending-connection registry, the way
    // two real nodes share the open internet.
    let network = LoopbackNetwork::new();

    let node_a = NodeCore::with_transport(
        NodeOpts {
            network_id: "test-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("node-a".into()),
            config: fast_config(10),
        },
        network.clone(),
    )
    .unwrap();

    let node_b = NodeCore::with_transport(
        NodeOpts {
            network_id: "test-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("node-b".into()),
            config: fast_config(10),
        },
        network.clone(),
    )
    .unwrap();

    let received: Arc<Mutex<Vec<Message>>> = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    node_b
        .on(move |event: &Event| {
            if let Event::Message(message) = event {
                received_clone.lock().unwrap().push(message.clone());
            }
        })
        .await;

    // Give the switchboard-driven handshake time to complete before we
    // broadcast, since delivery depends on an already-open data channel.
    timeout(Duration::from_secs(5), async {
        loop {
            if !node_a.active_connections().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("nodes never connected through the switchboard");

    node_a
        .broadcast(PartialMessage::app("chat", "text", serde_json::json!({"body": "hello from a"})))
        .await
        .expect("broadcast should succeed once app_id/type are set");

    let delivered = wait_until(|| !received.lock().unwrap().is_empty(), 5_000).await;
    assert!(delivered, "node-b never received node-a's broadcast");

    let messages = received.lock().unwrap().clone();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].address, "node-a");
    assert_eq!(messages[0].app_id, "chat");
    assert_eq!(messages[0].data["body"], "hello from a");

    node_a.teardown().await;
    node_b.teardown().await;
}

#[tokio::test]
async fn zero_connection_cap_admits_no_connections() {
    let switchboard = FakeSwitchboard::start().await;

    let node_a = NodeCore::with_transport(
        NodeOpts {
            network_id: "capped-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("capped-a".into()),
            config: fast_config(0),
        },
        LoopbackNetwork::new(),
    )
    .unwrap();

    let node_b = NodeCore::with_transport(
        NodeOpts {
            network_id: "capped-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("capped-b".into()),
            config: fast_config(0),
        },
        LoopbackNetwork::new(),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(node_a.connections().await.is_empty());
    assert!(node_b.connections().await.is_empty());

    node_a.teardown().await;
    node_b.teardown().await;
}

#[tokio::test]
async fn broadcast_requires_app_id_and_type() {
    let switchboard = FakeSwitchboard::start().await;
    let node = NodeCore::with_transport(
        NodeOpts {
            network_id: "solo-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("solo".into()),
            config: fast_config(5),
        },
        LoopbackNetwork::new(),
    )
    .unwrap();

    let missing_app_id = node
        .broadcast(PartialMessage {
            app_id: None,
            kind: Some("text".into()),
            ttl: None,
            destination: None,
            data: serde_json::json!({}),
        })
        .await;
    assert!(missing_app_id.is_err());

    let missing_type = node
        .broadcast(PartialMessage {
            app_id: Some("chat".into()),
            kind: None,
            ttl: None,
            destination: None,
            data: serde_json::json!({}),
        })
        .await;
    assert!(missing_type.is_err());

    node.teardown().await;
}

#[tokio::test]
async fn switch_free_healing_connects_through_gossip_after_switchboard_stops() {
    // Spec §8 scenario 2: A and B connect over the switchboard; A stops
    // polling it; a late-joining C ends up connected to A anyway, purely
    // through presence/offer/answer gossiped across the A-B-C chain.
    let switchboard = FakeSwitchboard::start().await;
    let network = LoopbackNetwork::new();

    let node_a = NodeCore::with_transport(
        NodeOpts {
            network_id: "heal-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("node-a".into()),
            config: fast_config(10),
        },
        network.clone(),
    )
    .unwrap();

    let node_b = NodeCore::with_transport(
        NodeOpts {
            network_id: "heal-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("node-b".into()),
            config: fast_config(10),
        },
        network.clone(),
    )
    .unwrap();

    timeout(Duration::from_secs(5), async {
        loop {
            if !node_a.active_connections().await.is_empty() && !node_b.active_connections().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("A and B never connected through the switchboard");

    node_a.stop_switchboard_requests().await;

    // Let A's switchboard registration age out (the fake switchboard's
    // registration TTL is 150ms) before C ever asks, so C can only learn
    // of A by gossip relayed through B, never directly from the
    // switchboard.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let node_c = NodeCore::with_transport(
        NodeOpts {
            network_id: "heal-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("node-c".into()),
            config: fast_config(10),
        },
        network.clone(),
    )
    .unwrap();

    let connected_to_a = timeout(Duration::from_secs(20), async {
        loop {
            let connected = node_c
                .active_connections()
                .await
                .iter()
                .any(|c| c.remote_address.as_deref() == Some("node-a"));
            if connected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .is_ok();
    assert!(connected_to_a, "C never reached A without the switchboard's help");

    node_a.teardown().await;
    node_b.teardown().await;
    node_c.teardown().await;
}

#[tokio::test]
async fn solo_node_polls_the_switchboard_at_the_fast_cadence() {
    // P8: with no active connections a node stays on the fast interval,
    // never backing off to the slow one.
    let switchboard = FakeSwitchboard::start().await;
    let config = Config {
        presence_broadcast_interval_ms: 5_000,
        fast_switchboard_request_interval_ms: 100,
        slow_switchboard_request_interval_ms: 5_000,
        garbage_collect_interval_ms: 5_000,
        max_message_rate_before_rude: None,
        max_connections: 10,
        memory_duration_ms: 60_000,
        message_ttl_max: 6,
    };
    let node = NodeCore::with_transport(
        NodeOpts {
            network_id: "cadence-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("solo-cadence".into()),
            config,
        },
        LoopbackNetwork::new(),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(550)).await;

    let timestamps = switchboard.request_timestamps().await;
    assert!(timestamps.len() >= 3, "expected several switchboard ticks, got {}", timestamps.len());
    for pair in timestamps.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(50) && gap <= Duration::from_millis(400),
            "switchboard cadence gap {gap:?} outside the fast-interval tolerance (P8)"
        );
    }

    node.teardown().await;
}

#[tokio::test]
async fn teardown_stops_switchboard_polling_and_events() {
    // P9: teardown is final. No further switchboard ticks and no further
    // events fire once it returns.
    let switchboard = FakeSwitchboard::start().await;
    let node = NodeCore::with_transport(
        NodeOpts {
            network_id: "teardown-mesh".into(),
            switch_address: switchboard.url.clone(),
            identity: Identity::Unsigned("teardown-node".into()),
            config: fast_config(5),
        },
        LoopbackNetwork::new(),
    )
    .unwrap();

    let event_count = Arc::new(AtomicUsize::new(0));
    let ec = event_count.clone();
    node.on(move |_event: &Event| {
        ec.fetch_add(1, Ordering::SeqCst);
    })
    .await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    let before = switchboard.request_count().await;
    assert!(before > 0, "expected at least one switchboard tick before teardown");

    node.teardown().await;
    let snapshot = event_count.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(switchboard.request_count().await, before, "switchboard kept polling after teardown (P9)");
    assert_eq!(event_count.load(Ordering::SeqCst), snapshot, "events kept firing after teardown (P9)");
}
