//! Protocol engine - join handshake, relay flooding and causal delivery
//!
//! One engine per peer. It owns the causal clock, the buffer of operations
//! that are not yet deliverable and the relay set of peers that are still
//! joining. Every inbound frame is processed to completion (including buffer
//! drain and replies) before the next one, so none of that state is shared.

use crate::connections::Connections;
use crate::error::ProtocolResult;
use crate::message::{
    AliasParam, DataParam, DataRecord, Envelope, JoinResponseParam, Message, MessageKind,
    Operation,
};
use flood_core::{
    CausalClock, Event, EventBus, EventKind, ListenerId, Payload, SharedDocument, SiteId,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a joining peer may stay in the relay set without finishing
    /// the ready handshake
    pub relay_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay_timeout: Duration::from_secs(120),
        }
    }
}

/// An operation received before its causal dependencies
#[derive(Debug, Clone)]
struct PendingOperation {
    vv: CausalClock,
    operation: Operation,
}

#[derive(Debug, Clone)]
struct RelayEntry {
    site: SiteId,
    since: Instant,
}

/// Causal broadcast engine of one peer
pub struct ProtocolEngine {
    clock: CausalClock,
    buffer: Vec<PendingOperation>,
    relay: Vec<RelayEntry>,
    events: EventBus,
    connections: Arc<dyn Connections>,
    document: Arc<dyn SharedDocument>,
    config: EngineConfig,
}

impl ProtocolEngine {
    /// Create the engine of `local`, its clock at zero
    pub fn new(
        local: SiteId,
        connections: Arc<dyn Connections>,
        document: Arc<dyn SharedDocument>,
    ) -> Self {
        Self::with_config(local, connections, document, EngineConfig::default())
    }

    pub fn with_config(
        local: SiteId,
        connections: Arc<dyn Connections>,
        document: Arc<dyn SharedDocument>,
        config: EngineConfig,
    ) -> Self {
        Self {
            clock: CausalClock::new(local),
            buffer: Vec::new(),
            relay: Vec::new(),
            events: EventBus::new(),
            connections,
            document,
            config,
        }
    }

    pub fn local_site(&self) -> &SiteId {
        self.clock.owner()
    }

    pub fn clock(&self) -> &CausalClock {
        &self.clock
    }

    /// Number of operations waiting for their dependencies
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Peers currently receiving flooded data, oldest first
    pub fn relay_sites(&self) -> Vec<SiteId> {
        self.relay.iter().map(|e| e.site.clone()).collect()
    }

    /// Register a listener for delivered operations or membership events
    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.events.subscribe(kind, listener)
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Process one raw frame received from `sender`.
    ///
    /// Malformed frames leave the engine untouched: they are logged, answered
    /// with an error envelope and returned to the caller.
    pub fn handle(&mut self, raw: &str, sender: &SiteId) -> ProtocolResult<()> {
        let result = match Envelope::decode(raw) {
            Ok(Message::Error(error)) => {
                warn!(site = %sender, key = %error.key, description = %error.description, "Peer reported an error");
                Ok(())
            }
            Ok(Message::Data(record)) => self.dispatch(record, raw, sender),
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            warn!(site = %sender, error = %e, "Dropping malformed message");
            self.send_error(sender, e.code(), &e.to_string())?;
        }

        result
    }

    fn dispatch(&mut self, record: DataRecord, raw: &str, sender: &SiteId) -> ProtocolResult<()> {
        debug!(site = %sender, kind = ?record.key, vv = %record.vv, "Received message");

        match record.key {
            MessageKind::JoinRequest => {
                let param: AliasParam = record.param()?;
                info!(site = %sender, alias = %param.alias, "Peer requested to join the document");
                self.handle_join_request(sender)
            }
            MessageKind::JoinResponse => {
                let param: JoinResponseParam = record.param()?;
                self.handle_join_response(param, sender);
                Ok(())
            }
            MessageKind::Ready => {
                let param: AliasParam = record.param()?;
                self.handle_ready(param, sender, true)
            }
            MessageKind::AckReady => {
                let param: AliasParam = record.param()?;
                self.handle_ready(param, sender, false)
            }
            MessageKind::Data => {
                self.forward(raw);
                let param: DataParam = record.param()?;
                let operation = param.into_operation()?;
                self.handle_data(record.vv, operation);
                Ok(())
            }
            MessageKind::Disconnect => {
                info!(site = %sender, "Peer disconnected");
                self.peer_left(sender);
                Ok(())
            }
        }
    }

    fn handle_join_request(&mut self, requester: &SiteId) -> ProtocolResult<()> {
        let now = Instant::now();
        match self.relay.iter_mut().find(|e| &e.site == requester) {
            Some(entry) => entry.since = now,
            None => self.relay.push(RelayEntry {
                site: requester.clone(),
                since: now,
            }),
        }

        let participants = self
            .connections
            .neighbours()
            .into_iter()
            .filter(|site| site != requester)
            .collect();

        let param = JoinResponseParam {
            title: self.document.document_title(),
            alias: self.document.alias(),
            doc: self.document.document_model(),
            vv: self.clock.clone(),
            participants,
        };

        self.send(requester, MessageKind::JoinResponse, &param)
    }

    fn handle_join_response(&mut self, param: JoinResponseParam, sender: &SiteId) {
        info!(site = %sender, title = %param.title, vv = %param.vv, "Joined document");

        self.clock.union(&param.vv);
        self.events.emit(&Event::RemoteInsertion(param.doc));
        // operations flooded before the snapshot may now be stale or ready
        self.drain_buffer();

        let local = self.clock.owner().clone();
        let participants = param
            .participants
            .into_iter()
            .filter(|site| site != &local)
            .collect();
        self.events.emit(&Event::BuildConnections(participants));

        self.document.set_document_title(param.title);
        self.document.add_participant(sender.clone(), param.alias);
    }

    fn handle_ready(&mut self, param: AliasParam, sender: &SiteId, ack: bool) -> ProtocolResult<()> {
        info!(site = %sender, alias = %param.alias, ack, "Peer ready");

        self.remove_relay(sender);
        self.document.add_participant(sender.clone(), param.alias);
        self.connections.set_ready(sender);

        if ack {
            let reply = AliasParam {
                alias: self.document.alias(),
            };
            self.send(sender, MessageKind::AckReady, &reply)?;
        }

        Ok(())
    }

    fn handle_data(&mut self, vv: CausalClock, operation: Operation) {
        if self.clock.is_lower(&vv) {
            debug!(vv = %vv, clock = %self.clock, "Dropping already delivered operation");
            return;
        }

        if self.clock.is_ready(&vv) {
            self.clock.increment_from(&vv);
            self.deliver(operation);
            self.drain_buffer();
        } else {
            debug!(vv = %vv, clock = %self.clock, "Buffering operation until causally ready");
            self.buffer.push(PendingOperation { vv, operation });
        }
    }

    /// Deliver every buffered operation that became ready, rescanning from the
    /// start after each delivery. Stale entries are discarded on the way.
    fn drain_buffer(&mut self) {
        let mut idx = 0;

        while idx < self.buffer.len() {
            if self.clock.is_lower(&self.buffer[idx].vv) {
                self.buffer.remove(idx);
            } else if self.clock.is_ready(&self.buffer[idx].vv) {
                let pending = self.buffer.remove(idx);
                self.clock.increment_from(&pending.vv);
                self.deliver(pending.operation);
                idx = 0;
            } else {
                idx += 1;
            }
        }
    }

    fn deliver(&mut self, operation: Operation) {
        let event = match operation {
            Operation::Insertion(data) => Event::RemoteInsertion(data),
            Operation::Deletion(data) => Event::RemoteDeletion(data),
        };
        debug!(event = %event.kind(), clock = %self.clock, "Delivering operation");
        self.events.emit(&event);
    }

    /// Flood a raw data frame to every joining peer, pruning unreachable ones
    fn forward(&mut self, raw: &str) {
        let mut unreachable = Vec::new();

        for entry in &self.relay {
            match self.connections.get(&entry.site) {
                Some(channel) => channel.send(raw),
                None => unreachable.push(entry.site.clone()),
            }
        }

        if !unreachable.is_empty() {
            info!(sites = ?unreachable, "Pruning unreachable peers from relay set");
            self.relay.retain(|e| !unreachable.contains(&e.site));
        }
    }

    fn remove_relay(&mut self, site: &SiteId) {
        self.relay.retain(|e| &e.site != site);
    }

    /// A peer went away: stop relaying to it and drop it from the neighbour set
    pub fn peer_left(&mut self, site: &SiteId) {
        self.remove_relay(site);
        self.connections.remove(site);
        self.document.remove_participant(site);
    }

    /// Remove relay entries older than the relay timeout, returning them
    pub fn expire_relays(&mut self, now: Instant) -> Vec<SiteId> {
        let timeout = self.config.relay_timeout;
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .relay
            .drain(..)
            .partition(|e| now.saturating_duration_since(e.since) >= timeout);
        self.relay = kept;

        let expired: Vec<SiteId> = expired.into_iter().map(|e| e.site).collect();
        if !expired.is_empty() {
            warn!(sites = ?expired, "Join did not complete in time, relay stopped");
        }
        expired
    }

    /// Ask `recipient` to let us join its document
    pub fn send_join(&mut self, recipient: &SiteId) -> ProtocolResult<()> {
        let param = AliasParam {
            alias: self.document.alias(),
        };
        self.send(recipient, MessageKind::JoinRequest, &param)
    }

    /// Tell every neighbour that all connections listed at join are open
    pub fn send_ready(&mut self) -> ProtocolResult<()> {
        let param = AliasParam {
            alias: self.document.alias(),
        };
        self.broadcast(MessageKind::Ready, &param)
    }

    /// Broadcast a local insertion
    pub fn send_insertion(&mut self, data: Payload) -> ProtocolResult<()> {
        self.clock.increment();
        self.broadcast(MessageKind::Data, &DataParam::insertion(data))
    }

    /// Broadcast a local deletion
    pub fn send_deletion(&mut self, data: Payload) -> ProtocolResult<()> {
        self.clock.increment();
        self.broadcast(MessageKind::Data, &DataParam::deletion(data))
    }

    /// Announce a graceful leave to every neighbour
    pub fn send_disconnect(&mut self) -> ProtocolResult<()> {
        self.broadcast(MessageKind::Disconnect, &serde_json::Value::Null)
    }

    /// Send an error envelope to `recipient`
    pub fn send_error(&self, recipient: &SiteId, key: &str, description: &str) -> ProtocolResult<()> {
        let frame = Envelope::error(key, description).encode()?;
        self.deliver_frame(recipient, &frame);
        Ok(())
    }

    fn send<P: Serialize>(&self, recipient: &SiteId, kind: MessageKind, param: &P) -> ProtocolResult<()> {
        let frame = Envelope::data(kind, self.clock.clone(), param)?.encode()?;
        self.deliver_frame(recipient, &frame);
        Ok(())
    }

    fn broadcast<P: Serialize>(&self, kind: MessageKind, param: &P) -> ProtocolResult<()> {
        let frame = Envelope::data(kind, self.clock.clone(), param)?.encode()?;
        for neighbour in self.connections.neighbours() {
            self.deliver_frame(&neighbour, &frame);
        }
        Ok(())
    }

    fn deliver_frame(&self, recipient: &SiteId, frame: &str) {
        match self.connections.get(recipient) {
            Some(channel) => {
                channel.send(frame);
                debug!(site = %recipient, frame = %frame, "Sent message");
            }
            None => debug!(site = %recipient, "Peer unreachable, message skipped"),
        }
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("clock", &self.clock)
            .field("pending", &self.buffer.len())
            .field("relay", &self.relay_sites())
            .finish()
    }
}
