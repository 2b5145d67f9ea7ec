//! A peer-to-peer mesh overlay over WebRTC, bootstrapped through an HTTP
//! switchboard and kept connected with gossip-propagated session
//! descriptions. See `node::NodeCore` for the embedding entry point.

pub mod canonical;
pub mod config;
pub mod connection;
mod connection_manager;
pub mod crypto;
pub mod error;
pub mod event;
mod gossip;
mod negotiator;
pub mod node;
pub mod rude_list;
pub mod seen_memory;
mod switchboard;
pub mod transport;
pub mod types;

pub use connection::{Connection, ReplyVia};
pub use crypto::SigningKey;
pub use error::{ConnectionError, GossipError, NodeError, SwitchboardError, TransportError};
pub use event::{Event, Listener, ListenerHandle};
pub use node::{ConnectionSnapshot, Identity, NodeCore, NodeOpts};
pub use types::{
    Address, ConnState, ConnectionId, Destination, Message, Negotiation, NegotiationItem, NegotiationKind,
    PartialMessage, Role, Signature, SwitchboardRequest, SwitchboardResponse,
};
