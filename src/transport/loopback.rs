//! In-process loopback transport used by the `sim` feature and by the
//! integration tests in `tests/`. No real networking: two transports "find"
//! each other through a shared label registry and exchange bytes over
//! `mpsc` channels directly, standing in for the opaque WebRTC transport
//! the production build wires through `webrtc_transport`.

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent, TransportFactory, MAX_MESSAGE_BYTES};
use crate::types::NegotiationKind;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

type DataTx = mpsc::UnboundedSender<Vec<u8>>;

/// Implements `TransportFactory` directly (not via a wrapper around
/// `Arc<Self>`) so that `Arc<LoopbackNetwork>` coerces to `Arc<dyn
/// TransportFactory>` the ordinary way; the pending-label registry itself
/// is `Arc`-wrapped internally so transports can hold a cheap handle to it
/// without needing an `Arc` back to the whole network.
pub struct LoopbackNetwork {
    pending: Arc<DashMap<String, DataTx>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(LoopbackNetwork {
            pending: Arc::new(DashMap::new()),
        })
    }
}

#[async_trait]
impl TransportFactory for LoopbackNetwork {
    async fn build(
        &self,
        _initiator: bool,
        initial_remote_sdp: Option<String>,
    ) -> (Box<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let label = uuid::Uuid::new_v4().to_string();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let connected = Arc::new(AtomicBool::new(false));

        // Every transport registers its own label before anything else, so
        // whichever side signals second can always find the other: the
        // initiator needs to be found by the responder's `build`, and the
        // responder in turn needs to be found by the initiator's later
        // `signal(Answer, ...)` call.
        self.pending.insert(label.clone(), inbound_tx.clone());

        let peer_tx = if let Some(remote_label) = initial_remote_sdp.clone() {
            // We're the responder: the remote's label is already known, so
            // hook up directly and answer right away.
            let peer = self.pending.remove(&remote_label).map(|(_, tx)| tx);
            if peer.is_some() {
                connected.store(true, Ordering::SeqCst);
                let _ = event_tx.send(TransportEvent::Signal {
                    kind: NegotiationKind::Answer,
                    sdp: label.clone(),
                });
                let _ = event_tx.send(TransportEvent::Connect);
            }
            peer
        } else {
            // We're the initiator: announce our offer: the responder will
            // find us by this label (already registered above).
            let _ = event_tx.send(TransportEvent::Signal {
                kind: NegotiationKind::Offer,
                sdp: label.clone(),
            });
            None
        };

        let transport = LoopbackTransport {
            label,
            pending: self.pending.clone(),
            peer_tx: Arc::new(std::sync::Mutex::new(peer_tx)),
            connected: connected.clone(),
            event_tx: event_tx.clone(),
        };

        tokio::spawn(async move {
            while let Some(bytes) = inbound_rx.recv().await {
                if event_tx.send(TransportEvent::Data(bytes)).is_err() {
                    break;
                }
            }
        });

        (Box::new(transport), event_rx)
    }
}

pub struct LoopbackTransport {
    label: String,
    pending: Arc<DashMap<String, DataTx>>,
    peer_tx: Arc<std::sync::Mutex<Option<DataTx>>>,
    connected: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_MESSAGE_BYTES {
            return Err(TransportError::TooLarge);
        }
        let guard = self.peer_tx.lock().expect("loopback transport mutex poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(data.to_vec()).map_err(|_| TransportError::Closed),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn signal(&self, sdp: &str, kind: NegotiationKind) -> Result<(), TransportError> {
        if kind != NegotiationKind::Answer {
            // The initiator receives the responder's answer label here and
            // completes the pairing.
            return Ok(());
        }
        let peer = self.pending.remove(sdp).map(|(_, tx)| tx);
        if let Some(tx) = peer {
            *self.peer_tx.lock().expect("loopback transport mutex poisoned") = Some(tx);
            self.connected.store(true, Ordering::SeqCst);
            let _ = self.event_tx.send(TransportEvent::Connect);
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn channel_label(&self) -> Option<String> {
        if self.connected.load(Ordering::SeqCst) {
            Some(self.label.clone())
        } else {
            None
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.pending.remove(&self.label);
        *self.peer_tx.lock().expect("loopback transport mutex poisoned") = None;
    }
}
