//! Connection lifecycle (spec §4.2, §4.8): creating initiator/responder
//! Connections, forwarding their transport events back into the owning
//! loop, and garbage-collecting dead or duplicate ones. Implemented as
//! inherent methods on [`CoreState`] per the single-writer design (spec
//! §5) — there is no separately-owned `ConnectionManager` object, only
//! this file's share of `CoreState`'s method surface.

use crate::connection::{Connection, ReplyVia};
use crate::error::ConnectionError;
use crate::event::Event;
use crate::node::{CoreState, ManagerEvent, LoopEvent};
use crate::transport::TransportEvent;
use crate::types::{
    Address, ConnectionId, Negotiation, NegotiationItem, NegotiationKind, Role, CONTROL_TYPE_ANSWER, CONTROL_TYPE_OFFER,
};
use crate::{crypto, negotiator};

impl CoreState {
    /// Starts a new Connection as the offer-generating side. Returns `None`
    /// if the connection cap (spec §4.5, P5) is already reached.
    pub async fn create_initiator(&mut self, remote_address: Option<Address>, reply_via: ReplyVia) -> Option<ConnectionId> {
        if self.connections.len() >= self.config.max_connections {
            return None;
        }
        Some(self.spawn_connection(Role::Initiator, remote_address, None, reply_via).await)
    }

    /// Handles an inbound offer (from the switchboard or in-band gossip).
    /// Applies the Negotiator's acceptance policy (spec §4.2) before
    /// spawning a responder Connection.
    pub async fn accept_offer(&mut self, from: Address, offer: Negotiation, reply_via: ReplyVia) -> Option<ConnectionId> {
        if !negotiator::should_accept_offer(self, &from, &offer) {
            return None;
        }
        let decrypted = crypto::decrypt_sdp(self.signing_key.as_ref(), &from, offer.sdp.as_deref().unwrap_or_default());
        let Ok(decrypted_sdp) = decrypted else {
            self.events.emit(Event::BadMessage {
                from: Some(from),
                reason: "offer sdp failed to decrypt".into(),
            });
            return None;
        };
        let id = self.spawn_connection(Role::Responder, Some(from.clone()), Some(decrypted_sdp), reply_via).await;
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.offer = offer;
        }
        Some(id)
    }

    /// Feeds a remote answer into the Connection it completes.
    pub async fn signal_answer(&mut self, from: Address, answer: Negotiation) {
        let connection_id = answer.connection_id;
        if !negotiator::should_accept_answer(self, connection_id, &from) {
            return;
        }
        let Some(conn) = self.connections.get_mut(&connection_id) else {
            log::debug!("{}", ConnectionError::NotFound(connection_id));
            return;
        };
        let decrypted = crypto::decrypt_sdp(self.signing_key.as_ref(), &from, answer.sdp.as_deref().unwrap_or_default());
        let Ok(decrypted_sdp) = decrypted else {
            self.events.emit(Event::BadMessage {
                from: Some(from),
                reason: "answer sdp failed to decrypt".into(),
            });
            return;
        };
        let mut stored = answer;
        stored.sdp = Some(decrypted_sdp.clone());
        conn.answer = Some(stored);
        if conn.remote_address.is_none() {
            conn.remote_address = Some(from.clone());
        }
        let transport = &conn.transport;
        let _ = transport.signal(&decrypted_sdp, NegotiationKind::Answer).await;
    }

    /// `build` drives ICE gathering to completion before returning (spec
    /// §4.1, trickle disabled), so this is genuinely async; since every
    /// caller already runs inside the single owning loop task, there is no
    /// race on inserting `id` into `self.connections`.
    async fn spawn_connection(
        &mut self,
        role: Role,
        remote_address: Option<Address>,
        initial_remote_sdp: Option<String>,
        reply_via: ReplyVia,
    ) -> ConnectionId {
        let id = ConnectionId::fresh();
        let initiator = role == Role::Initiator;
        let offer = Negotiation::pending(NegotiationKind::Offer, self.our_address.clone(), id, self.network_id.clone());

        let (transport, mut events) = self.transport_factory.build(initiator, initial_remote_sdp).await;
        let conn = Connection {
            id,
            role,
            remote_address,
            offer,
            answer: None,
            state: crate::types::ConnState::Pending,
            transport,
            connected_at: None,
            reply_via,
            reply_sent: false,
        };
        self.connections.insert(id, conn);

        let loop_tx = self.loop_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if loop_tx.send(LoopEvent::Manager(ManagerEvent { id, event })).is_err() {
                    return;
                }
            }
        });

        id
    }

    pub async fn handle_transport_event(&mut self, manager_event: ManagerEvent) {
        let ManagerEvent { id, event } = manager_event;
        match event {
            TransportEvent::Signal { kind, sdp } => self.on_local_signal(id, kind, sdp).await,
            TransportEvent::Data(bytes) => self.ingest(id, bytes).await,
            TransportEvent::Connect => self.on_transport_connected(id),
            TransportEvent::Close => self.on_transport_closed(id, None),
            TransportEvent::Error(reason) => self.on_transport_closed(id, Some(reason)),
        }
    }

    async fn on_local_signal(&mut self, id: ConnectionId, kind: NegotiationKind, sdp: String) {
        let Some(conn) = self.connections.get_mut(&id) else {
            log::debug!("{}", ConnectionError::NotFound(id));
            return;
        };
        if conn.reply_sent {
            log::debug!("{}", ConnectionError::WrongState(id));
            return;
        }
        let Some(remote_address) = conn.remote_address.clone() else {
            // A bare initiator offer with no known recipient yet (broadcast
            // discovery case): store it and wait for a responder to claim
            // it via the switchboard or an in-band offer reply.
            conn.offer.sdp = Some(sdp);
            conn.advance_to_open();
            return;
        };
        let encrypted = match crypto::encrypt_sdp(self.signing_key.as_ref(), &remote_address, &sdp) {
            Ok(s) => s,
            Err(_) => {
                self.events.emit(Event::ConnectionError {
                    id,
                    error: "failed to encrypt outgoing sdp".into(),
                });
                return;
            }
        };

        let negotiation = match kind {
            NegotiationKind::Offer => {
                conn.offer.sdp = Some(sdp.clone());
                conn.offer.clone()
            }
            NegotiationKind::Answer => {
                let mut answer = Negotiation::pending(NegotiationKind::Answer, self.our_address.clone(), id, self.network_id.clone());
                answer.sdp = Some(sdp.clone());
                conn.answer = Some(answer.clone());
                answer
            }
        };
        conn.advance_to_open();
        let reply_via = conn.reply_via.clone();
        conn.reply_sent = true;

        let mut wire_negotiation = negotiation;
        wire_negotiation.sdp = Some(encrypted);

        match reply_via {
            ReplyVia::Switchboard => {
                self.pending_switchboard_items.push(NegotiationItem {
                    for_address: remote_address,
                    from: self.our_address.clone(),
                    negotiation: wire_negotiation,
                });
            }
            ReplyVia::Gossip(to) => {
                let control_kind = match kind {
                    NegotiationKind::Offer => CONTROL_TYPE_OFFER,
                    NegotiationKind::Answer => CONTROL_TYPE_ANSWER,
                };
                self.send_control_to(control_kind, to, serde_json::to_value(&wire_negotiation).unwrap_or_default())
                    .await;
            }
        }

        self.events.emit(Event::ConnectionProcess { id, state: conn_state(self, id) });
    }

    fn on_transport_connected(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            log::debug!("{}", ConnectionError::NotFound(id));
            return;
        };
        conn.advance_to_connected();
        let remote_address = conn.remote_address.clone();
        log::info!("connection {id} connected to {remote_address:?}");
        self.events.emit(Event::AddConnection { id, address: remote_address.clone() });
        self.events.emit(Event::ConnectionProcess { id, state: crate::types::ConnState::Connected });
        if remote_address.is_some() {
            self.remove_duplicate_connections(id);
        }
    }

    fn on_transport_closed(&mut self, id: ConnectionId, error: Option<String>) {
        let Some(conn) = self.connections.get_mut(&id) else {
            log::debug!("{}", ConnectionError::NotFound(id));
            return;
        };
        if conn.is_dead() {
            log::debug!("{}", ConnectionError::WrongState(id));
            return;
        }
        conn.mark_dead();
        let address = conn.remote_address.clone();
        if let Some(reason) = error {
            log::warn!("connection {id} to {address:?} errored: {reason}");
            self.events.emit(Event::ConnectionError { id, error: reason });
        } else {
            log::debug!("connection {id} to {address:?} closed");
        }
        self.events.emit(Event::DestroyConnection { id, address });
    }

    /// Tears a Connection down immediately: closes its transport and
    /// removes it from the map. Used by explicit teardown and by `gc`'s
    /// dead/duplicate sweep (spec §4.8, P9: teardown is final — a torn-down
    /// Connection is removed, not merely marked, so it can never reappear).
    pub async fn destroy_connection(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.remove(&id) {
            conn.transport.close().await;
            self.events.emit(Event::DestroyConnection {
                id,
                address: conn.remote_address,
            });
        }
    }

    /// Among Connections that share a `remote_address` and are `Connected`,
    /// keeps only the one with the latest `connected_at` (spec §9, Open
    /// Question b) and tears the rest down. Invoked right after a fresh
    /// `Connect` transition, since that is the only moment a duplicate can
    /// newly appear.
    fn remove_duplicate_connections(&mut self, just_connected: ConnectionId) {
        let Some(conn) = self.connections.get(&just_connected) else { return };
        let Some(remote_address) = conn.remote_address.clone() else { return };

        let mut duplicates: Vec<(ConnectionId, std::time::Instant)> = self
            .connections
            .values()
            .filter(|c| c.is_connected() && c.remote_address.as_ref() == Some(&remote_address))
            .filter_map(|c| c.connected_at.map(|t| (c.id, t)))
            .collect();
        if duplicates.len() <= 1 {
            return;
        }
        duplicates.sort_by_key(|(_, t)| *t);
        // all but the most recent get torn down
        let losers: Vec<ConnectionId> = duplicates[..duplicates.len() - 1].iter().map(|(id, _)| *id).collect();
        for id in losers {
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.mark_dead();
            }
        }
    }

    /// Periodic sweep (spec §4.7's GC timer): drops Dead connections,
    /// expires old SeenMemory entries and stale RudeList windows are
    /// evicted lazily on next use.
    pub async fn gc(&mut self) {
        self.seen.sweep();
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| c.is_dead())
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.destroy_connection(id).await;
        }
    }
}

fn conn_state(state: &CoreState, id: ConnectionId) -> crate::types::ConnState {
    state
        .connections
        .get(&id)
        .map(|c| c.state)
        .unwrap_or(crate::types::ConnState::Dead)
}
