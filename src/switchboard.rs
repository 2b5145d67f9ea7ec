//! The HTTP rendezvous client (spec §4.4, §6): posts our address plus any
//! negotiation items waiting for delivery, learns of newly-announced peers
//! and any negotiation items addressed to us, and feeds both back into
//! `connection_manager`/`negotiator`. Implemented as `CoreState` methods,
//! same as the rest of the core (spec §5).

use crate::connection::ReplyVia;
use crate::error::SwitchboardError;
use crate::event::Event;
use crate::node::CoreState;
use crate::types::{Address, SwitchboardRequest, SwitchboardResponse};

impl CoreState {
    /// One request/response round trip, driven by the adaptive-cadence
    /// scheduler task (spec §4.4, P8). Never propagates an error — a
    /// failed tick just gets logged and retried on the next cadence,
    /// with its negotiation items put back for the next attempt.
    pub(crate) async fn run_switchboard_tick(&mut self) {
        let outgoing_items = std::mem::take(&mut self.pending_switchboard_items);
        let request = SwitchboardRequest {
            network_id: self.network_id.clone(),
            address: self.our_address.clone(),
            negotiation_items: outgoing_items,
        };

        let response = match self.http.post(&self.switch_address).json(&request).send().await {
            Ok(r) => r,
            Err(e) => {
                let e = SwitchboardError::Request(e);
                log::warn!("switchboard request to {}: {e}", self.switch_address);
                self.log_lines.push(e.to_string());
                self.pending_switchboard_items.extend(request.negotiation_items);
                return;
            }
        };

        let body: SwitchboardResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                let e = SwitchboardError::Decode(e);
                log::warn!("{e}");
                self.log_lines.push(e.to_string());
                self.pending_switchboard_items.extend(request.negotiation_items);
                return;
            }
        };

        self.events.emit(Event::SwitchboardResponse);

        for address in body.addresses {
            self.maybe_initiate_to(address).await;
        }

        for item in body.negotiation_items {
            if item.for_address != self.our_address {
                continue;
            }
            match item.negotiation.kind {
                crate::types::NegotiationKind::Offer => {
                    self.accept_offer(item.from, item.negotiation, ReplyVia::Switchboard).await;
                }
                crate::types::NegotiationKind::Answer => {
                    self.signal_answer(item.from, item.negotiation).await;
                }
            }
        }
    }

    /// Initiates a Connection to a switchboard-announced address, unless
    /// we already have one, it's us, or (to avoid both sides dialing each
    /// other at once) our address doesn't sort strictly before theirs.
    async fn maybe_initiate_to(&mut self, address: Address) {
        if self.our_address >= address {
            return;
        }
        let already = self
            .connections
            .values()
            .any(|c| !c.is_dead() && c.remote_address.as_ref() == Some(&address));
        if already {
            return;
        }
        self.create_initiator(Some(address.clone()), ReplyVia::Switchboard).await;
    }
}
