//! Node - one peer of the mesh, driving its protocol engine from a single task
//!
//! Connection readers, the local user and the relay sweep all talk to the
//! node through one command queue, so the engine processes every frame and
//! local edit to completion before the next.

use flood_core::{CausalClock, Event, EventKind, ListenerId, Payload, SharedDocument, SiteId};
use flood_protocol::{Connections, EngineConfig, Operation, ProtocolEngine};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::registry::PeerRegistry;
use crate::tcp::Mesh;

/// Work items for the node task
#[derive(Debug)]
pub enum NodeCommand {
    /// A frame read from a peer connection
    Inbound { from: SiteId, frame: String },
    /// A peer connection closed
    PeerGone(SiteId),
    /// Broadcast a local insertion
    Insert(Payload),
    /// Broadcast a local deletion
    Delete(Payload),
    /// Send a join request over an open connection
    Join(SiteId),
    /// Announce that the connections listed at join are open
    Ready,
    Status(oneshot::Sender<NodeStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Snapshot of a node's protocol state
#[derive(Debug, Clone)]
pub struct NodeStatus {
    pub clock: CausalClock,
    pub pending: usize,
    pub relay: Vec<SiteId>,
    pub neighbours: Vec<SiteId>,
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub engine: EngineConfig,
    /// How often stale relay entries are swept
    pub relay_sweep: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            relay_sweep: Duration::from_secs(5),
        }
    }
}

/// Applies a local edit to the document before it is broadcast
pub type LocalApply = Box<dyn FnMut(&Operation) + Send>;

/// A mesh peer that has not been started yet
pub struct Node {
    engine: ProtocolEngine,
    mesh: Mesh,
    commands: mpsc::UnboundedReceiver<NodeCommand>,
    commands_tx: mpsc::UnboundedSender<NodeCommand>,
    dials: mpsc::UnboundedReceiver<Vec<SiteId>>,
    local_apply: Option<LocalApply>,
    config: NodeConfig,
}

impl Node {
    /// Create the node of `local`. `local` must be the address it listens on.
    pub fn new(local: SiteId, document: Arc<dyn SharedDocument>, config: NodeConfig) -> Self {
        let registry = Arc::new(PeerRegistry::new());
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let mesh = Mesh::new(local.clone(), registry.clone(), commands_tx.clone());

        let mut engine =
            ProtocolEngine::with_config(local, registry, document, config.engine.clone());

        let (dial_tx, dials) = mpsc::unbounded_channel();
        engine.subscribe(EventKind::BuildConnections, move |event| {
            if let Event::BuildConnections(sites) = event {
                let _ = dial_tx.send(sites.clone());
            }
        });

        Self {
            engine,
            mesh,
            commands,
            commands_tx,
            dials,
            local_apply: None,
            config,
        }
    }

    pub fn local_site(&self) -> &SiteId {
        self.engine.local_site()
    }

    /// Register an event listener. Listeners run on the node task.
    pub fn subscribe<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&Event) + Send + 'static,
    {
        self.engine.subscribe(kind, listener)
    }

    /// Set the hook that applies local edits to the shared document.
    ///
    /// It runs on the node task right before the edit's clock tick and
    /// broadcast, so a join snapshot never holds an edit its clock lacks.
    pub fn on_local_edit<F>(&mut self, apply: F)
    where
        F: FnMut(&Operation) + Send + 'static,
    {
        self.local_apply = Some(Box::new(apply));
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            mesh: self.mesh.clone(),
            commands: self.commands_tx.clone(),
        }
    }

    /// Start accepting on `listener` and processing commands
    pub fn spawn(self, listener: TcpListener) -> NodeHandle {
        let handle = self.handle();
        let accept = tokio::spawn(self.mesh.clone().serve(listener));
        tokio::spawn(self.run(accept));
        handle
    }

    async fn run(mut self, accept: JoinHandle<()>) {
        let mut sweep = tokio::time::interval(self.config.relay_sweep);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut stopped = None;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(NodeCommand::Shutdown(done)) => {
                        self.shutdown();
                        stopped = Some(done);
                        break;
                    }
                    Some(cmd) => self.process(cmd),
                    None => break,
                },

                Some(sites) = self.dials.recv() => self.build_connections(sites),

                _ = sweep.tick() => {
                    let expired = self.engine.expire_relays(Instant::now());
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "Relay sweep");
                    }
                }
            }
        }

        self.commands.close();
        accept.abort();
        info!(site = %self.engine.local_site(), "Node stopped");

        if let Some(done) = stopped {
            let _ = done.send(());
        }
    }

    fn process(&mut self, cmd: NodeCommand) {
        let result = match cmd {
            NodeCommand::Inbound { from, frame } => self.engine.handle(&frame, &from),
            NodeCommand::PeerGone(site) => {
                info!(site = %site, "Peer left");
                self.engine.peer_left(&site);
                Ok(())
            }
            NodeCommand::Insert(data) => {
                let data = self.apply_local(Operation::Insertion(data));
                self.engine.send_insertion(data)
            }
            NodeCommand::Delete(data) => {
                let data = self.apply_local(Operation::Deletion(data));
                self.engine.send_deletion(data)
            }
            NodeCommand::Join(site) => self.engine.send_join(&site),
            NodeCommand::Ready => self.engine.send_ready(),
            NodeCommand::Status(reply) => {
                let _ = reply.send(self.status());
                Ok(())
            }
            NodeCommand::Shutdown(done) => {
                let _ = done.send(());
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "Command failed");
        }
    }

    fn apply_local(&mut self, operation: Operation) -> Payload {
        if let Some(apply) = self.local_apply.as_mut() {
            apply(&operation);
        }
        match operation {
            Operation::Insertion(data) | Operation::Deletion(data) => data,
        }
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            clock: self.engine.clock().clone(),
            pending: self.engine.pending_len(),
            relay: self.engine.relay_sites(),
            neighbours: self.mesh.registry().neighbours(),
        }
    }

    /// Open a connection to every listed participant, then announce ready
    fn build_connections(&self, sites: Vec<SiteId>) {
        let mesh = self.mesh.clone();
        let commands = self.commands_tx.clone();

        tokio::spawn(async move {
            for site in sites {
                if let Err(e) = mesh.connect(&site).await {
                    warn!(site = %site, error = %e, "Could not reach participant");
                }
            }
            let _ = commands.send(NodeCommand::Ready);
        });
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.engine.send_disconnect() {
            warn!(error = %e, "Failed to announce disconnect");
        }
        self.mesh.close_all();
    }
}

/// Handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct NodeHandle {
    mesh: Mesh,
    commands: mpsc::UnboundedSender<NodeCommand>,
}

impl NodeHandle {
    pub fn local_site(&self) -> &SiteId {
        self.mesh.local_site()
    }

    pub fn insert(&self, data: Payload) -> TransportResult<()> {
        self.send(NodeCommand::Insert(data))
    }

    pub fn delete(&self, data: Payload) -> TransportResult<()> {
        self.send(NodeCommand::Delete(data))
    }

    /// Connect to the peer at `addr` and ask to join its document.
    /// Returns the site the peer announced.
    pub async fn join(&self, addr: &SiteId) -> TransportResult<SiteId> {
        let site = self.mesh.connect(addr).await?;
        self.send(NodeCommand::Join(site.clone()))?;
        Ok(site)
    }

    pub async fn status(&self) -> TransportResult<NodeStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeCommand::Status(tx))?;
        rx.await.map_err(|_| TransportError::NodeClosed)
    }

    /// Announce the leave to every neighbour and stop the node
    pub async fn shutdown(&self) -> TransportResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(NodeCommand::Shutdown(tx))?;
        rx.await.map_err(|_| TransportError::NodeClosed)
    }

    fn send(&self, cmd: NodeCommand) -> TransportResult<()> {
        self.commands.send(cmd).map_err(|_| TransportError::NodeClosed)
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("site", self.mesh.local_site())
            .finish()
    }
}
