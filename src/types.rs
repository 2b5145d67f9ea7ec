//! Wire types and data-model records (spec §3): `Address`, `Negotiation`,
//! `Message`, and the `Connection` state enum. Mirrors the teacher's habit
//! of type-aliasing identifier strings (`NodeId = String`) and deriving
//! `Serialize`/`Deserialize` directly on the wire records.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Either the hex public key derived from a node's signing key, or an
/// arbitrary string when running unsigned. Addresses are equality-compared
/// as byte strings (`PartialEq` on `String` already does this).
pub type Address = String;

/// Locally generated unique identifier for a [`crate::connection::Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn fresh() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed at Connection creation; never changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// Monotone forward transitions only; `Dead` is terminal. See §4.8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnState {
    Pending,
    Open,
    Connected,
    Dead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationKind {
    Offer,
    Answer,
}

/// Session-description payload exchanged to establish a peer-to-peer
/// connection (spec §3 "Negotiation record"). `sdp` is `None` while pending.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Negotiation {
    #[serde(rename = "type")]
    pub kind: NegotiationKind,
    pub address: Address,
    pub sdp: Option<String>,
    pub connection_id: ConnectionId,
    pub network_id: String,
    pub timestamp: u64,
}

impl Negotiation {
    pub fn pending(kind: NegotiationKind, address: Address, connection_id: ConnectionId, network_id: String) -> Self {
        Negotiation {
            kind,
            address,
            sdp: None,
            connection_id,
            network_id,
            timestamp: now_ms(),
        }
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// `destination` field of a [`Message`]: a specific Address, or the
/// broadcast wildcard `"*"`. Serializes to a bare JSON string either way, so
/// it gets a hand-written `Serialize`/`Deserialize` instead of a derive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Address(Address),
    Wildcard,
}

impl Destination {
    pub fn matches(&self, me: &Address) -> bool {
        match self {
            Destination::Wildcard => true,
            Destination::Address(a) => a == me,
        }
    }
}

impl Default for Destination {
    fn default() -> Self {
        Destination::Wildcard
    }
}

impl Serialize for Destination {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Destination::Wildcard => serializer.serialize_str("*"),
            Destination::Address(a) => serializer.serialize_str(a),
        }
    }
}

impl<'de> Deserialize<'de> for Destination {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(if s == "*" {
            Destination::Wildcard
        } else {
            Destination::Address(s)
        })
    }
}

/// One hop's signature over the message as it stood when that hop signed it
/// (§4.3 "Signing contract"). When signing is disabled this still carries an
/// empty-string signature so the hop count keeps working.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub signer: Address,
    pub signature: String,
}

/// The `"network"` namespace is reserved for control messages (presence,
/// offer, answer, log).
pub const CONTROL_APP_ID: &str = "network";

pub const CONTROL_TYPE_PRESENCE: &str = "presence";
pub const CONTROL_TYPE_OFFER: &str = "offer";
pub const CONTROL_TYPE_ANSWER: &str = "answer";
pub const CONTROL_TYPE_LOG: &str = "log";

pub const MESSAGE_TTL_MAX: u8 = 6;

/// Application and control message (spec §3 "Message"). `kind` serializes as
/// the wire field `"type"` to dodge the Rust keyword.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub address: Address,
    pub app_id: String,
    pub ttl: u8,
    #[serde(rename = "type")]
    pub kind: String,
    pub destination: Destination,
    pub data: serde_json::Value,
    pub signatures: Vec<Signature>,
}

/// Fields supplied by a caller of `broadcast`; everything else is filled in
/// with defaults by `GossipEngine::broadcast` (spec §4.3).
#[derive(Clone, Debug, Default)]
pub struct PartialMessage {
    pub app_id: Option<String>,
    pub kind: Option<String>,
    pub ttl: Option<u8>,
    pub destination: Option<Destination>,
    pub data: serde_json::Value,
}

impl PartialMessage {
    /// `ttl` is left unset so `GossipEngine::broadcast` applies the
    /// configured maximum (spec §4.3's defaulting rule: "ttl = 6"):
    /// presence announcements and offer/answer replies both need to
    /// travel multiple hops through the mesh, not just to a direct
    /// neighbor, since the peer they're addressed to may not be one yet.
    pub fn control(kind: &str, destination: Destination, data: serde_json::Value) -> Self {
        PartialMessage {
            app_id: Some(CONTROL_APP_ID.to_string()),
            kind: Some(kind.to_string()),
            ttl: None,
            destination: Some(destination),
            data,
        }
    }

    pub fn app(app_id: &str, kind: &str, data: serde_json::Value) -> Self {
        PartialMessage {
            app_id: Some(app_id.to_string()),
            kind: Some(kind.to_string()),
            ttl: None,
            destination: None,
            data,
        }
    }
}

/// One entry of the switchboard wire protocol's `negotiationItems` array
/// (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NegotiationItem {
    #[serde(rename = "for")]
    pub for_address: Address,
    pub from: Address,
    pub negotiation: Negotiation,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchboardRequest {
    pub network_id: String,
    pub address: Address,
    pub negotiation_items: Vec<NegotiationItem>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchboardResponse {
    pub addresses: Vec<Address>,
    pub negotiation_items: Vec<NegotiationItem>,
}
