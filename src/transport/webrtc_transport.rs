//! Production `Transport` backed by the `webrtc` crate (webrtc-rs). Per
//! spec §1 this is the "underlying WebRTC peer implementation... treated as
//! an opaque transport with a defined event contract" — deliberately not
//! part of the core's interesting, tested surface. Grounded in the
//! teacher's `net/connections.rs` shape: one task owns the raw connection
//! and forwards everything it sees onto an unbounded event channel; the
//! public type here just swaps a `tokio_tungstenite::WebSocketStream` for
//! an `RTCPeerConnection` + one ordered, unreliable `RTCDataChannel`.
//!
//! Trickle ICE is disabled (spec §4.1): the local description isn't handed
//! back until ICE gathering completes, so every candidate is already baked
//! into the SDP blob that travels over the switchboard/gossip channel.

use crate::error::TransportError;
use crate::transport::{Transport, TransportEvent, TransportFactory, MAX_MESSAGE_BYTES};
use crate::types::NegotiationKind;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

const DATA_CHANNEL_LABEL: &str = "meshnet";

pub struct WebRtcFactory {
    ice_servers: Vec<String>,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<String>) -> Self {
        WebRtcFactory { ice_servers }
    }

    async fn new_peer_connection(&self) -> Result<RTCPeerConnection, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Other(e.into()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::Other(e.into()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let config = RTCConfiguration {
            ice_servers: vec![webrtc::ice_transport::ice_server::RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        api.new_peer_connection(config)
            .await
            .map_err(|e| TransportError::Other(e.into()))
    }
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn build(
        &self,
        initiator: bool,
        initial_remote_sdp: Option<String>,
    ) -> (Box<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let pc = match self.new_peer_connection().await {
            Ok(pc) => Arc::new(pc),
            Err(e) => {
                let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                let _ = event_tx.send(TransportEvent::Close);
                return (Box::new(DeadTransport), event_rx);
            }
        };

        let connected = Arc::new(AtomicBool::new(false));
        let channel: Arc<tokio::sync::Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(tokio::sync::Mutex::new(None));

        {
            let event_tx = event_tx.clone();
            pc.on_peer_connection_state_change(Box::new(move |state| {
                let event_tx = event_tx.clone();
                Box::pin(async move {
                    use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState as S;
                    match state {
                        S::Closed | S::Disconnected | S::Failed => {
                            let _ = event_tx.send(TransportEvent::Close);
                        }
                        _ => {}
                    }
                })
            }));
        }

        if initiator {
            let dc = match pc
                .create_data_channel(
                    DATA_CHANNEL_LABEL,
                    Some(RTCDataChannelInit {
                        ordered: Some(true),
                        max_retransmits: Some(0),
                        ..Default::default()
                    }),
                )
                .await
            {
                Ok(dc) => dc,
                Err(e) => {
                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                    return (Box::new(DeadTransport), event_rx);
                }
            };
            wire_data_channel(dc.clone(), event_tx.clone(), connected.clone()).await;
            *channel.lock().await = Some(dc);

            if let Err(e) = negotiate_offer(&pc, &event_tx).await {
                let _ = event_tx.send(TransportEvent::Error(e.to_string()));
            }
        } else {
            let event_tx2 = event_tx.clone();
            let channel2 = channel.clone();
            let connected2 = connected.clone();
            pc.on_data_channel(Box::new(move |dc| {
                let event_tx = event_tx2.clone();
                let channel = channel2.clone();
                let connected = connected2.clone();
                Box::pin(async move {
                    wire_data_channel(dc.clone(), event_tx, connected).await;
                    *channel.lock().await = Some(dc);
                })
            }));

            if let Some(offer_sdp) = initial_remote_sdp {
                if let Err(e) = negotiate_answer(&pc, offer_sdp, &event_tx).await {
                    let _ = event_tx.send(TransportEvent::Error(e.to_string()));
                }
            }
        }

        let transport = WebRtcTransport {
            pc,
            channel,
            connected,
        };
        (Box::new(transport), event_rx)
    }
}

async fn negotiate_offer(
    pc: &Arc<RTCPeerConnection>,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), TransportError> {
    let offer = pc.create_offer(None).await.map_err(|e| TransportError::Other(e.into()))?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(offer).await.map_err(|e| TransportError::Other(e.into()))?;
    let _ = gather_complete.recv().await;
    let local = pc.local_description().await.ok_or(TransportError::Closed)?;
    let _ = event_tx.send(TransportEvent::Signal {
        kind: NegotiationKind::Offer,
        sdp: local.sdp,
    });
    Ok(())
}

async fn negotiate_answer(
    pc: &Arc<RTCPeerConnection>,
    offer_sdp: String,
    event_tx: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<(), TransportError> {
    let offer = RTCSessionDescription::offer(offer_sdp).map_err(|e| TransportError::Other(e.into()))?;
    pc.set_remote_description(offer).await.map_err(|e| TransportError::Other(e.into()))?;
    let answer = pc.create_answer(None).await.map_err(|e| TransportError::Other(e.into()))?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(answer).await.map_err(|e| TransportError::Other(e.into()))?;
    let _ = gather_complete.recv().await;
    let local = pc.local_description().await.ok_or(TransportError::Closed)?;
    let _ = event_tx.send(TransportEvent::Signal {
        kind: NegotiationKind::Answer,
        sdp: local.sdp,
    });
    Ok(())
}

async fn wire_data_channel(
    dc: Arc<RTCDataChannel>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    {
        let event_tx = event_tx.clone();
        let connected = connected.clone();
        dc.on_open(Box::new(move || {
            connected.store(true, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Connect);
            Box::pin(async {})
        }));
    }
    {
        let event_tx = event_tx.clone();
        dc.on_message(Box::new(move |msg| {
            let event_tx = event_tx.clone();
            let data = msg.data.to_vec();
            Box::pin(async move {
                let _ = event_tx.send(TransportEvent::Data(data));
            })
        }));
    }
    {
        let connected = connected.clone();
        dc.on_close(Box::new(move || {
            connected.store(false, Ordering::SeqCst);
            let _ = event_tx.send(TransportEvent::Close);
            Box::pin(async {})
        }));
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<tokio::sync::Mutex<Option<Arc<RTCDataChannel>>>>,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if data.len() > MAX_MESSAGE_BYTES {
            return Err(TransportError::TooLarge);
        }
        let guard = self.channel.lock().await;
        match guard.as_ref() {
            Some(dc) if self.connected.load(Ordering::SeqCst) => dc
                .send(&Bytes::copy_from_slice(data))
                .await
                .map(|_| ())
                .map_err(|e| TransportError::Other(e.into())),
            _ => Err(TransportError::NotConnected),
        }
    }

    async fn signal(&self, sdp: &str, kind: NegotiationKind) -> Result<(), TransportError> {
        let desc = match kind {
            NegotiationKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            NegotiationKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        }
        .map_err(|e| TransportError::Other(e.into()))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| TransportError::Other(e.into()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn channel_label(&self) -> Option<String> {
        // Only meaningful once populated, mirrors the teacher's GC
        // heuristic of checking for a present data-channel name (spec §9b).
        None
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(dc) = self.channel.lock().await.take() {
            let _ = dc.close().await;
        }
        let _ = self.pc.close().await;
    }
}

/// Stand-in returned when peer-connection construction itself fails; emits
/// nothing but `Close`/`Error` already sent, and answers every call as
/// already-dead so `ConnectionManager` tears it down on the next GC pass.
struct DeadTransport;

#[async_trait]
impl Transport for DeadTransport {
    async fn send(&self, _data: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Closed)
    }
    async fn signal(&self, _sdp: &str, _kind: NegotiationKind) -> Result<(), TransportError> {
        Err(TransportError::Closed)
    }
    fn is_connected(&self) -> bool {
        false
    }
    fn channel_label(&self) -> Option<String> {
        None
    }
    async fn close(&self) {}
}
