//! Message authoring and the inbound gossip pipeline (spec §4.3): dedupe,
//! hop bound, signature verification, rude-sender rejection, local
//! dispatch and rebroadcast. Implemented as `CoreState` methods alongside
//! `connection_manager`'s and `switchboard`'s, per the single-writer
//! design (spec §5).

use crate::connection::ReplyVia;
use crate::crypto;
use crate::event::Event;
use crate::node::CoreState;
use crate::types::{
    Destination, Message, PartialMessage, Signature, CONTROL_APP_ID, CONTROL_TYPE_ANSWER, CONTROL_TYPE_LOG,
    CONTROL_TYPE_OFFER, CONTROL_TYPE_PRESENCE,
};
use crate::canonical::canonical_with_signatures;
use crate::error::GossipError;

impl CoreState {
    /// `broadcast` (spec §4.3, §6): fills in `id`/`address`/`ttl`, signs if
    /// a signing key is configured, marks the message seen (so our own
    /// rebroadcast of it back to us is a no-op) and sends it to every
    /// connected peer.
    pub async fn broadcast(&mut self, partial: PartialMessage) -> Result<(), crate::error::NodeError> {
        let app_id = partial.app_id.ok_or(crate::error::NodeError::MissingField("app_id"))?;
        let kind = partial.kind.ok_or(crate::error::NodeError::MissingField("type"))?;

        let mut message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            address: self.our_address.clone(),
            app_id,
            ttl: partial.ttl.unwrap_or(self.config.message_ttl_max),
            kind,
            destination: partial.destination.unwrap_or_default(),
            data: partial.data,
            signatures: Vec::new(),
        };

        let signature = match &self.signing_key {
            Some(key) => {
                let canon = canonical_with_signatures(&message, &[]);
                key.sign(&canon)
            }
            // Unsigned mode still appends a (self, "") pair so the hop
            // count carried by the signature chain's length keeps working
            // (spec §4.3 "broadcast").
            None => String::new(),
        };
        message.signatures.push(Signature {
            signer: self.our_address.clone(),
            signature,
        });

        self.seen.add(&message.id);
        self.events.emit(Event::BroadcastMessage(message.clone()));
        self.flood(&message, None).await;
        Ok(())
    }

    pub(crate) async fn send_control_to(&mut self, kind: &str, to: String, data: serde_json::Value) {
        let partial = PartialMessage::control(kind, Destination::Address(to), data);
        let _ = self.broadcast(partial).await;
    }

    async fn broadcast_presence_message(&mut self) {
        let partial = PartialMessage::control(CONTROL_TYPE_PRESENCE, Destination::Wildcard, serde_json::json!({}));
        let _ = self.broadcast(partial).await;
    }

    /// Runs the full inbound pipeline on bytes received over `from`'s
    /// transport (spec §4.3, §4.6): parse, dedupe (P1), verify the
    /// signature chain (P3), reject rude senders (P7), dispatch locally
    /// when addressed to us, and flood onward while hops remain (P2).
    pub(crate) async fn ingest(&mut self, from: crate::types::ConnectionId, bytes: Vec<u8>) {
        let message: Message = match serde_json::from_slice(&bytes) {
            Ok(m) => m,
            Err(e) => {
                let e = GossipError::Malformed(e.to_string());
                log::debug!("dropping malformed inbound message: {e}");
                self.events.emit(Event::BadMessage {
                    from: None,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if self.seen.add(&message.id) {
            log::debug!("{}", GossipError::Duplicate);
            return;
        }

        if message.signatures.len() as u8 > message.ttl || message.ttl > self.config.message_ttl_max {
            log::debug!("dropping {} from {}: ttl/hop bound exceeded", message.id, message.address);
            self.events.emit(Event::BadMessage {
                from: Some(message.address.clone()),
                reason: "ttl/hop bound exceeded".into(),
            });
            return;
        }

        if self.signing_key.is_some() {
            if let Err(e) = self.verify_chain(&message) {
                self.rude.register(&message.address);
                log::warn!("{} from {}: {e}", message.id, message.address);
                self.events.emit(Event::BadMessage {
                    from: Some(message.address.clone()),
                    reason: e.to_string(),
                });
                return;
            }
        }

        self.rude.register(&message.address);
        if self.rude.is_rude(&message.address) {
            log::warn!("{} exceeded the message rate, rejecting further traffic", message.address);
            self.events.emit(Event::BadMessage {
                from: Some(message.address.clone()),
                reason: "sender exceeded message rate".into(),
            });
            return;
        }

        if message.destination.matches(&self.our_address) {
            self.dispatch_local(&message).await;
        }

        if (message.signatures.len() as u8) < message.ttl {
            self.flood(&message, Some(from)).await;
        }
    }

    /// Spec §4.3: each hop's signature covers the canonical form built over
    /// the signatures before it, and the originator's signature — the
    /// first in the chain — must belong to `message.address`. Checking
    /// each `sig.signature` against its own `sig.signer` alone only proves
    /// every signer signed what they claim; it does nothing to stop a
    /// relay from setting `message.address` to an address it doesn't hold
    /// and signing `signatures[0]` with its own key instead, so the
    /// address binding has to be checked separately after the chain
    /// verifies.
    fn verify_chain(&self, message: &Message) -> Result<(), GossipError> {
        if message.signatures.is_empty() {
            return Err(GossipError::MissingSignatures);
        }
        for (i, sig) in message.signatures.iter().enumerate() {
            let canon = canonical_with_signatures(message, &message.signatures[..i]);
            if !crypto::verify(&sig.signer, &canon, &sig.signature) {
                return Err(GossipError::BadSignature { signer: sig.signer.clone() });
            }
        }
        if message.signatures.first().map(|s| &s.signer) != Some(&message.address) {
            return Err(GossipError::OriginatorMismatch);
        }
        Ok(())
    }

    async fn dispatch_local(&mut self, message: &Message) {
        if message.app_id != CONTROL_APP_ID {
            self.events.emit(Event::Message(message.clone()));
            return;
        }
        match message.kind.as_str() {
            CONTROL_TYPE_PRESENCE => self.on_presence(message).await,
            CONTROL_TYPE_OFFER => self.on_inband_offer(message).await,
            CONTROL_TYPE_ANSWER => self.on_inband_answer(message).await,
            CONTROL_TYPE_LOG => self.log_lines.push(format!("{}: {}", message.address, message.data)),
            _ => {}
        }
    }

    async fn on_presence(&mut self, message: &Message) {
        let sender = message.address.clone();
        if sender == self.our_address {
            return;
        }
        let already_connected = self.connections.values().any(|c| !c.is_dead() && c.remote_address.as_deref() == Some(sender.as_str()));
        if already_connected {
            return;
        }
        // Tie-break so both sides of a mutual presence don't simultaneously
        // initiate a connection to each other.
        if self.our_address >= sender {
            return;
        }
        self.create_initiator(Some(sender.clone()), ReplyVia::Gossip(sender)).await;
    }

    async fn on_inband_offer(&mut self, message: &Message) {
        let Ok(negotiation) = serde_json::from_value(message.data.clone()) else {
            self.events.emit(Event::BadMessage {
                from: Some(message.address.clone()),
                reason: "offer control message missing a negotiation payload".into(),
            });
            return;
        };
        self.accept_offer(message.address.clone(), negotiation, ReplyVia::Gossip(message.address.clone()))
            .await;
    }

    async fn on_inband_answer(&mut self, message: &Message) {
        let Ok(negotiation) = serde_json::from_value(message.data.clone()) else {
            self.events.emit(Event::BadMessage {
                from: Some(message.address.clone()),
                reason: "answer control message missing a negotiation payload".into(),
            });
            return;
        };
        self.signal_answer(message.address.clone(), negotiation).await;
    }

    /// Sends `message` to every connected transport except `skip` (the
    /// connection it just arrived on, when any), appending our own
    /// signature to the chain first if we sign.
    async fn flood(&mut self, message: &Message, skip: Option<crate::types::ConnectionId>) {
        let mut outgoing = message.clone();
        if outgoing.signatures.last().map(|s| &s.signer) != Some(&self.our_address) {
            let signature = match &self.signing_key {
                Some(key) => {
                    let canon = canonical_with_signatures(&outgoing, &outgoing.signatures);
                    key.sign(&canon)
                }
                None => String::new(),
            };
            outgoing.signatures.push(Signature {
                signer: self.our_address.clone(),
                signature,
            });
        }
        let Ok(bytes) = serde_json::to_vec(&outgoing) else { return };
        for (id, conn) in self.connections.iter() {
            if Some(*id) == skip || !conn.is_connected() {
                continue;
            }
            if let Err(e) = conn.transport.send(&bytes).await {
                log::warn!("flood to connection {id:?} failed: {e}");
            }
        }
    }
}

impl CoreState {
    pub(crate) async fn broadcast_presence(&mut self) {
        self.broadcast_presence_message().await;
    }
}
