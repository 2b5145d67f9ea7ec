//! Stateless acceptance policy for inbound offers and answers (spec §4.2).
//! Pure functions over `&CoreState` rather than methods, since they only
//! ever read — keeping them free functions makes the five conditions
//! auditable in one place instead of scattered across `connection_manager`.

use crate::node::CoreState;
use crate::types::{Address, ConnectionId, Negotiation};

/// An inbound offer is accepted only when all of:
/// 1. it targets our network,
/// 2. it isn't a loopback from ourselves,
/// 3. we don't already have a live (non-dead) Connection to that address,
/// 4. the sender isn't on the rude list,
/// 5. we're under the connection cap.
pub fn should_accept_offer(state: &CoreState, from: &Address, offer: &Negotiation) -> bool {
    if offer.network_id != state.network_id {
        return false;
    }
    if from == &state.our_address {
        return false;
    }
    if state.rude.is_rude(from) {
        return false;
    }
    if state.connections.len() >= state.config.max_connections {
        return false;
    }
    let already_have_one = state
        .connections
        .values()
        .any(|c| !c.is_dead() && c.remote_address.as_ref() == Some(from));
    !already_have_one
}

/// An answer completes exactly one Pending initiator Connection: the one
/// named by `connection_id`, provided it hasn't already received an answer
/// and the sender isn't on the rude list.
pub fn should_accept_answer(state: &CoreState, connection_id: ConnectionId, from: &Address) -> bool {
    if state.rude.is_rude(from) {
        return false;
    }
    let Some(conn) = state.connections.get(&connection_id) else {
        return false;
    };
    conn.role == crate::types::Role::Initiator
        && !conn.is_dead()
        && conn.answer.is_none()
        && conn.remote_address.as_ref().map_or(true, |addr| addr == from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::EventBus;
    use crate::rude_list::RudeList;
    use crate::seen_memory::SeenMemory;
    use crate::transport::loopback::LoopbackNetwork;
    use crate::types::{ConnectionId, NegotiationKind};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn fresh_state() -> CoreState {
        let (loop_tx, _rx) = mpsc::unbounded_channel();
        CoreState {
            our_address: "me".into(),
            network_id: "net-1".into(),
            switch_address: "http://localhost:0".into(),
            signing_key: None,
            config: Config::default(),
            connections: Default::default(),
            seen: SeenMemory::new(Duration::from_secs(60)),
            rude: RudeList::new(None),
            events: EventBus::default(),
            transport_factory: LoopbackNetwork::new(),
            http: reqwest::Client::new(),
            loop_tx,
            log_lines: Vec::new(),
            pending_switchboard_items: Vec::new(),
            switchboard_handle: None,
        }
    }

    #[test]
    fn rejects_offer_for_a_different_network() {
        let state = fresh_state();
        let offer = Negotiation::pending(NegotiationKind::Offer, "peer".into(), ConnectionId::fresh(), "other-net".into());
        assert!(!should_accept_offer(&state, &"peer".to_string(), &offer));
    }

    #[test]
    fn rejects_offer_from_ourselves() {
        let state = fresh_state();
        let offer = Negotiation::pending(NegotiationKind::Offer, "me".into(), ConnectionId::fresh(), "net-1".into());
        assert!(!should_accept_offer(&state, &"me".to_string(), &offer));
    }

    #[test]
    fn accepts_a_well_formed_offer() {
        let state = fresh_state();
        let offer = Negotiation::pending(NegotiationKind::Offer, "peer".into(), ConnectionId::fresh(), "net-1".into());
        assert!(should_accept_offer(&state, &"peer".to_string(), &offer));
    }

    #[test]
    fn rejects_offer_over_connection_cap() {
        let mut state = fresh_state();
        state.config.max_connections = 0;
        let offer = Negotiation::pending(NegotiationKind::Offer, "peer".into(), ConnectionId::fresh(), "net-1".into());
        assert!(!should_accept_offer(&state, &"peer".to_string(), &offer));
    }
}
