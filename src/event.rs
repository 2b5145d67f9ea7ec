//! Public event model. The teacher's TypeScript source uses a string-keyed
//! emitter; per spec §9 this becomes a tagged union here, with `NodeCore`
//! offering a typed `on`/`remove_listener` registry over it (spec §6).

use crate::types::{Address, ConnState, ConnectionId, Message};

#[derive(Clone, Debug)]
pub enum Event {
    Message(Message),
    BroadcastMessage(Message),
    BadMessage { from: Option<Address>, reason: String },
    AddConnection { id: ConnectionId, address: Option<Address> },
    DestroyConnection { id: ConnectionId, address: Option<Address> },
    SwitchboardResponse,
    ConnectionError { id: ConnectionId, error: String },
    ConnectionProcess { id: ConnectionId, state: ConnState },
}

pub type Listener = Box<dyn Fn(&Event) + Send + Sync>;

/// Registry of listeners keyed by a caller-chosen handle, so
/// `remove_listener` can target a specific registration (spec §6). Access is
/// always serialized behind the same lock discipline as the rest of
/// `NodeCore`'s state (spec §5).
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(u64, Listener)>,
    next_id: u64,
}

pub struct ListenerHandle(pub u64);

impl EventBus {
    pub fn on<F>(&mut self, handler: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(handler)));
        ListenerHandle(id)
    }

    pub fn remove_listener(&mut self, handle: ListenerHandle) {
        self.listeners.retain(|(id, _)| *id != handle.0);
    }

    pub fn emit(&self, event: Event) {
        for (_, listener) in &self.listeners {
            listener(&event);
        }
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}
