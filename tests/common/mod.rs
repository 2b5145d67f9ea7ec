//! A deliberately tiny switchboard stand-in for integration tests: a raw
//! `tokio` TCP listener that speaks just enough HTTP/1.1 to receive a
//! [`meshnet_core::SwitchboardRequest`] and answer with a
//! [`meshnet_core::SwitchboardResponse`]. No framework, since the only
//! thing under test is whether `meshnet_core`'s client speaks the wire
//! protocol correctly, not how a real switchboard would be built.

use meshnet_core::{NegotiationItem, SwitchboardRequest, SwitchboardResponse};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// A node's address drops out of the registry if it hasn't re-registered
/// within this window, standing in for the spec glossary's "short-lived
/// in-memory set of addresses" — a node that stops polling (spec §4.4
/// `stop()`) eventually becomes undiscoverable through the switchboard,
/// same as it would through a real one.
const REGISTRATION_TTL: std::time::Duration = std::time::Duration::from_millis(150);

#[derive(Default)]
struct Registry {
    addresses: HashMap<String, Instant>,
    queued: HashMap<String, Vec<NegotiationItem>>,
}

pub struct FakeSwitchboard {
    pub url: String,
    request_log: Arc<Mutex<Vec<Instant>>>,
}

impl FakeSwitchboard {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake switchboard");
        let local_addr = listener.local_addr().expect("local addr");
        let registry = Arc::new(Mutex::new(Registry::default()));
        let request_log = Arc::new(Mutex::new(Vec::new()));

        let log_for_task = request_log.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let registry = registry.clone();
                let request_log = log_for_task.clone();
                tokio::spawn(async move {
                    let _ = serve_one(socket, registry, request_log).await;
                });
            }
        });

        FakeSwitchboard {
            url: format!("http://{local_addr}/switchboard"),
            request_log,
        }
    }

    /// Number of switchboard requests served so far, for asserting polling
    /// stops after teardown (P9).
    pub async fn request_count(&self) -> usize {
        self.request_log.lock().await.len()
    }

    /// Arrival time of every request served so far, for checking the gap
    /// between consecutive ticks matches the configured cadence (P8).
    pub async fn request_timestamps(&self) -> Vec<Instant> {
        self.request_log.lock().await.clone()
    }
}

async fn serve_one(mut socket: TcpStream, registry: Arc<Mutex<Registry>>, request_log: Arc<Mutex<Vec<Instant>>>) -> std::io::Result<()> {
    request_log.lock().await.push(Instant::now());
    let content_length = {
        let mut reader = BufReader::new(&mut socket);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        let mut length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if line.to_ascii_lowercase().starts_with("content-length:") {
                length = line.split(':').nth(1).and_then(|v| v.trim().parse().ok()).unwrap_or(0);
            }
        }
        length
    };

    let mut body = vec![0u8; content_length];
    socket.read_exact(&mut body).await?;
    let request: SwitchboardRequest = serde_json::from_slice(&body).expect("valid switchboard request");

    let response_body = {
        let mut registry = registry.lock().await;
        registry.addresses.insert(request.address.clone(), Instant::now());
        registry.addresses.retain(|_, seen_at| seen_at.elapsed() < REGISTRATION_TTL);
        for item in request.negotiation_items {
            registry.queued.entry(item.for_address.clone()).or_default().push(item);
        }
        let addresses: Vec<String> = registry
            .addresses
            .keys()
            .filter(|a| **a != request.address)
            .cloned()
            .collect();
        let negotiation_items = registry.queued.remove(&request.address).unwrap_or_default();
        SwitchboardResponse {
            addresses,
            negotiation_items,
        }
    };

    let json = serde_json::to_vec(&response_body).expect("serialize response");
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        json.len()
    );
    socket.write_all(header.as_bytes()).await?;
    socket.write_all(&json).await?;
    socket.flush().await?;
    Ok(())
}
