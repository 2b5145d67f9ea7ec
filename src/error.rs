//! Error taxonomy. Most of the system (§7 of the design) resolves errors into
//! an [`crate::event::Event`] or a log line rather than propagating them;
//! these types cover the handful of spots that do need to return a `Result`.

use crate::types::ConnectionId;

/// Errors that escape [`crate::node::NodeCore`] synchronously. Everything
/// else either becomes an `Event::BadMessage`/`Event::ConnectionError` or is
/// dropped with a log line.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("broadcast is missing required field: {0}")]
    MissingField(&'static str),
    #[error("secret could not be converted to a public key")]
    BadSecret,
    #[error("node is shutting down")]
    ShuttingDown,
}

/// Errors from the opaque transport (§4.1). A transient transport error
/// always resolves to the Connection becoming `Dead`; it never propagates.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("send on a non-connected transport")]
    NotConnected,
    #[error("message exceeds the maximum in-band size")]
    TooLarge,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why `GossipEngine::ingest` dropped a message without dispatching it.
#[derive(Debug, thiserror::Error)]
pub enum GossipError {
    #[error("duplicate message id")]
    Duplicate,
    #[error("signatures missing while signing is enabled")]
    MissingSignatures,
    #[error("signature verification failed for signer {signer}")]
    BadSignature { signer: String },
    /// Spec §4.3 signing contract: "Originator's signature is the last one
    /// verified and must match `address`." A chain can verify
    /// signature-by-signature and still fail this — the check that closes
    /// P3's authenticity guarantee.
    #[error("originator signature does not match the message's address")]
    OriginatorMismatch,
    #[error("malformed inbound payload: {0}")]
    Malformed(String),
}

/// Switchboard HTTP I/O failure for a single tick. Never fatal; the caller
/// drops the tick and reschedules on the same cadence rule.
#[derive(Debug, thiserror::Error)]
pub enum SwitchboardError {
    #[error("switchboard request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// `reqwest::Response::json` surfaces decode failures as its own error
    /// type, not a bare `serde_json::Error`, so this wraps the same type as
    /// `Request` rather than the serializer's.
    #[error("switchboard response was not valid JSON: {0}")]
    Decode(reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("no connection with id {0:?}")]
    NotFound(ConnectionId),
    #[error("connection {0:?} is not in the expected state")]
    WrongState(ConnectionId),
}
