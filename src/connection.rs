//! The `Connection` record and its state machine (spec §3, §4.8).
//!
//! ```text
//! Pending ──[signal: offer|answer sdp present]──▶ Open
//! Open    ──[transport connect]──────────────────▶ Connected
//! *       ──[transport close|error|destroy]──────▶ Dead
//! ```
//!
//! Transitions are one-way; there is no revival. Per spec §9 ("cyclic
//! ownership"), a `Connection` never holds a back-pointer into
//! `ConnectionManager` — transport event callbacks are keyed by
//! `ConnectionId` and routed back through `NodeCore`'s single event loop,
//! which is the only task that ever mutates a `Connection`.

use crate::transport::Transport;
use crate::types::{Address, ConnState, ConnectionId, Negotiation, Role};
use std::time::Instant;

/// Where a Connection's freshly-minted answer (or, symmetrically, a
/// switchboard-free offer) should be delivered once its transport reaches
/// `Open` (spec §4.2: "the answer it now carries is delivered back to the
/// caller (switchboard return path or in-band answer message)").
#[derive(Clone, Debug)]
pub enum ReplyVia {
    /// Queue it for the next switchboard POST's `negotiation_items`.
    Switchboard,
    /// Send it in-band as a `network`/`answer` (or `/offer`) control message
    /// addressed to this peer.
    Gossip(Address),
}

pub struct Connection {
    pub id: ConnectionId,
    pub role: Role,
    pub remote_address: Option<Address>,
    pub offer: Negotiation,
    pub answer: Option<Negotiation>,
    pub state: ConnState,
    pub transport: Box<dyn Transport>,
    /// Set on the `Connected` transition; used by `ConnectionManager::gc`'s
    /// duplicate-removal rule (spec §9, Open Question b): among Connections
    /// sharing a `remote_address`, the one with the most recent `connect`
    /// wins.
    pub connected_at: Option<Instant>,
    pub reply_via: ReplyVia,
    /// Set once this Connection's freshly-generated negotiation has been
    /// handed off via `reply_via`, so a later duplicate `Open` transition
    /// (shouldn't happen, but transports are opaque) can't double-send it.
    pub reply_sent: bool,
}

impl Connection {
    /// I1: at most one `Connected` connection per `remote_address` — callers
    /// use this together with `remote_address` to find duplicates.
    pub fn is_connected(&self) -> bool {
        self.state == ConnState::Connected
    }

    pub fn is_dead(&self) -> bool {
        self.state == ConnState::Dead
    }

    /// I2 (Pending initiator): `offer.sdp == None`.
    pub fn is_pending_initiator(&self) -> bool {
        self.state == ConnState::Pending && self.role == Role::Initiator && self.offer.sdp.is_none()
    }

    /// I2 (Pending responder): `offer.sdp != None`, `answer.sdp == None`.
    pub fn is_pending_responder(&self) -> bool {
        self.state == ConnState::Pending
            && self.role == Role::Responder
            && self.offer.sdp.is_some()
            && self.answer.as_ref().map_or(true, |a| a.sdp.is_none())
    }

    pub fn advance_to_open(&mut self) {
        if self.state == ConnState::Pending {
            self.state = ConnState::Open;
        }
    }

    pub fn advance_to_connected(&mut self) {
        if self.state == ConnState::Pending || self.state == ConnState::Open {
            self.state = ConnState::Connected;
            self.connected_at = Some(Instant::now());
        }
    }

    pub fn mark_dead(&mut self) {
        self.state = ConnState::Dead;
    }
}

// `Connection` is exercised end-to-end (construction through a real
// `Transport`, all three transitions, I1/I2 invariants under concurrent
// duplicates) by `connection_manager`'s test suite, which is where a
// `Connection` can actually be built without a live transport factory.
