//! Event bus - hands delivered operations and membership events upward

use crate::site::SiteId;

/// Opaque document payload carried by insertions, deletions and snapshots
pub type Payload = serde_json::Value;

/// Events published by the protocol engine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Elements to insert into the local document (also a full join snapshot)
    RemoteInsertion(Payload),
    /// Elements to remove from the local document
    RemoteDeletion(Payload),
    /// Peers the transport should open connections to after a join
    BuildConnections(Vec<SiteId>),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::RemoteInsertion(_) => EventKind::RemoteInsertion,
            Event::RemoteDeletion(_) => EventKind::RemoteDeletion,
            Event::BuildConnections(_) => EventKind::BuildConnections,
        }
    }
}

/// Name of an event, used to subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RemoteInsertion,
    RemoteDeletion,
    BuildConnections,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::RemoteInsertion => write!(f, "remoteInsertion"),
            EventKind::RemoteDeletion => write!(f, "remoteDeletion"),
            EventKind::BuildConnections => write!(f, "buildConnections"),
        }
    }
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked with each matching event. Whatever the closure captures
/// is its receiver.
pub type Listener = Box<dyn FnMut(&Event) + Send>;

/// Named subscriber lists, called in registration order
#[derive(Default)]
pub struct EventBus {
    listeners: Vec<(EventKind, ListenerId, Listener)>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind
    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((kind, id, Box::new(listener)));
        id
    }

    /// Remove a listener, returns whether it was registered
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(_, lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Call every listener registered for the event's kind.
    /// Returns the number of listeners called.
    pub fn emit(&mut self, event: &Event) -> usize {
        let kind = event.kind();
        let mut called = 0;

        for (_, _, listener) in self.listeners.iter_mut().filter(|(k, _, _)| *k == kind) {
            listener(event);
            called += 1;
        }

        called
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.iter().filter(|(k, _, _)| *k == kind).count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
