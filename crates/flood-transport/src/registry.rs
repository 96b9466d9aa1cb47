//! Peer registry - the connection provider backing the protocol engine

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flood_core::SiteId;
use flood_protocol::{encode_frame, Channel, Connections};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Outbound half of one peer connection
struct PeerLink {
    tx: mpsc::UnboundedSender<Bytes>,
    /// Connection order, used to list neighbours deterministically
    seq: u64,
    ready: bool,
}

/// All open peer connections, indexed by site
#[derive(Default)]
pub struct PeerRegistry {
    peers: DashMap<SiteId, PeerLink>,
    counter: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the writer queue of a new connection.
    /// Returns false if `site` already has a connection.
    pub fn register(&self, site: SiteId, tx: mpsc::UnboundedSender<Bytes>) -> bool {
        match self.peers.entry(site) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                let seq = self.counter.fetch_add(1, Ordering::Relaxed);
                slot.insert(PeerLink { tx, seq, ready: false });
                true
            }
        }
    }

    pub fn contains(&self, site: &SiteId) -> bool {
        self.peers.contains_key(site)
    }

    pub fn is_ready(&self, site: &SiteId) -> bool {
        self.peers.get(site).map(|link| link.ready).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Queues frames onto a connection's writer task
struct LinkChannel {
    site: SiteId,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl Channel for LinkChannel {
    fn send(&self, frame: &str) {
        if self.tx.send(encode_frame(frame)).is_err() {
            debug!(site = %self.site, "Writer gone, frame dropped");
        }
    }
}

impl Connections for PeerRegistry {
    fn get(&self, site: &SiteId) -> Option<Arc<dyn Channel>> {
        self.peers.get(site).map(|link| {
            Arc::new(LinkChannel {
                site: site.clone(),
                tx: link.tx.clone(),
            }) as Arc<dyn Channel>
        })
    }

    fn neighbours(&self) -> Vec<SiteId> {
        let mut peers: Vec<(u64, SiteId)> = self
            .peers
            .iter()
            .map(|entry| (entry.value().seq, entry.key().clone()))
            .collect();
        peers.sort();
        peers.into_iter().map(|(_, site)| site).collect()
    }

    fn set_ready(&self, site: &SiteId) {
        if let Some(mut link) = self.peers.get_mut(site) {
            link.ready = true;
        }
    }

    fn remove(&self, site: &SiteId) {
        // dropping the sender ends the writer task, which closes the socket
        self.peers.remove(site);
    }
}
