//! The opaque WebRTC peer transport (spec §1 "treated as an opaque
//! transport with a defined event contract", §3 Connection.transport, §4.1
//! the four subscribed events `signal`/`data`/`close`/`error`, plus
//! `connect`). Grounded in the teacher's `net/connections.rs`
//! `build_connection`/`maintain_connection` shape: one task owns the raw
//! transport and forwards its events out over an unbounded channel keyed by
//! nothing more than the channel itself, with the caller (here,
//! `ConnectionManager`) holding the sending half to drive outbound sends.

#[cfg(not(feature = "sim"))]
pub mod webrtc_transport;

pub mod loopback;

use crate::error::TransportError;
use crate::types::NegotiationKind;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Spec §6: "Implementations must accept messages up to at least 64 KiB."
/// Enforced by every `Transport::send` impl, which rejects anything larger
/// with `TransportError::TooLarge` rather than handing it to the channel.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Events a `Transport` emits, matching spec §4.1's four subscriptions plus
/// `connect`.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local session description became available (an offer if we're the
    /// initiator and just created one, an answer if we're the responder).
    Signal { kind: NegotiationKind, sdp: String },
    /// Raw bytes received on the data channel.
    Data(Vec<u8>),
    /// The data channel opened and is ready to send.
    Connect,
    /// The peer connection closed.
    Close,
    /// A transient transport error (spec §7 "Transient transport error").
    Error(String),
}

/// One peer-to-peer transport session (the `transport` field of spec §3's
/// `Connection`). `ConnectionManager` owns the only handle to each
/// `Transport`; nothing else is allowed to reach into it directly (spec §9
/// "cyclic ownership").
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends application bytes over the data channel. Must fail cleanly
    /// (never panic) when the channel is not open.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Feeds a remote session description (already decrypted) into the
    /// underlying peer connection, as `set_remote_description` would.
    async fn signal(&self, sdp: &str, kind: NegotiationKind) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// The data channel's negotiated label, when known. Used by
    /// `ConnectionManager::gc`'s duplicate-removal heuristic (spec §9b).
    fn channel_label(&self) -> Option<String>;

    /// Tears the transport down. Idempotent.
    async fn close(&self);
}

/// Constructs a fresh `Transport` plus the receiver half of its event
/// stream. `initiator = true` creates the offer-generating side (spec
/// §4.1: "the transport is created with `initiator = (supplied_offer ==
/// null)`"). `initial_remote_sdp` carries the already-received offer when
/// building a responder's transport, so the answer can start generating
/// immediately instead of waiting for a later `signal` call.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn build(
        &self,
        initiator: bool,
        initial_remote_sdp: Option<String>,
    ) -> (Box<dyn Transport>, mpsc::UnboundedReceiver<TransportEvent>);
}
