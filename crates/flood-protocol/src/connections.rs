//! Connection provider consumed by the protocol engine

use flood_core::SiteId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// A point-to-point channel to one peer. Sending is fire-and-forget.
pub trait Channel: Send + Sync {
    fn send(&self, frame: &str);
}

/// Turns site identifiers into channels and tracks the neighbour set
pub trait Connections: Send + Sync {
    /// Channel to `site`, `None` when the peer is unreachable
    fn get(&self, site: &SiteId) -> Option<Arc<dyn Channel>>;

    /// Every currently connected peer
    fn neighbours(&self) -> Vec<SiteId>;

    /// Mark the connection to `site` as having completed the ready handshake
    fn set_ready(&self, site: &SiteId);

    /// Forget `site`, closing its connection if still open
    fn remove(&self, site: &SiteId);
}

/// In-process connection provider that records every frame sent.
///
/// Used to embed an engine without a network and to drive engines in tests.
#[derive(Default)]
pub struct MemoryConnections {
    peers: Mutex<Vec<SiteId>>,
    ready: Mutex<HashSet<SiteId>>,
    outbox: Arc<Mutex<Vec<(SiteId, String)>>>,
}

struct MemoryChannel {
    site: SiteId,
    outbox: Arc<Mutex<Vec<(SiteId, String)>>>,
}

impl Channel for MemoryChannel {
    fn send(&self, frame: &str) {
        self.outbox.lock().push((self.site.clone(), frame.to_string()));
    }
}

impl MemoryConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a peer
    pub fn connect(&self, site: SiteId) {
        let mut peers = self.peers.lock();
        if !peers.contains(&site) {
            peers.push(site);
        }
    }

    pub fn is_ready(&self, site: &SiteId) -> bool {
        self.ready.lock().contains(site)
    }

    /// Drain all frames sent so far, in send order
    pub fn take_sent(&self) -> Vec<(SiteId, String)> {
        std::mem::take(&mut *self.outbox.lock())
    }

    /// Drain the frames sent to one peer, keeping the others
    pub fn take_sent_to(&self, site: &SiteId) -> Vec<String> {
        let mut outbox = self.outbox.lock();
        let (mine, rest): (Vec<_>, Vec<_>) = outbox.drain(..).partition(|(to, _)| to == site);
        *outbox = rest;
        mine.into_iter().map(|(_, frame)| frame).collect()
    }
}

impl Connections for MemoryConnections {
    fn get(&self, site: &SiteId) -> Option<Arc<dyn Channel>> {
        if !self.peers.lock().contains(site) {
            return None;
        }

        Some(Arc::new(MemoryChannel {
            site: site.clone(),
            outbox: self.outbox.clone(),
        }))
    }

    fn neighbours(&self) -> Vec<SiteId> {
        self.peers.lock().clone()
    }

    fn set_ready(&self, site: &SiteId) {
        self.ready.lock().insert(site.clone());
    }

    fn remove(&self, site: &SiteId) {
        self.peers.lock().retain(|p| p != site);
        self.ready.lock().remove(site);
    }
}
