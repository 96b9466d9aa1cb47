//! TCP mesh - accepts and dials peer connections

use bytes::Bytes;
use flood_core::SiteId;
use flood_protocol::{encode_frame, Connections, ProtocolError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};
use crate::handler::ConnectionHandler;
use crate::node::NodeCommand;
use crate::registry::PeerRegistry;

/// How long a new connection may take to send its greeting
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// First frame on every connection, in both directions
#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    site: SiteId,
}

struct MeshInner {
    local: SiteId,
    registry: Arc<PeerRegistry>,
    commands: mpsc::UnboundedSender<NodeCommand>,
}

/// Connection management for one node. Cheap to clone.
#[derive(Clone)]
pub struct Mesh {
    inner: Arc<MeshInner>,
}

impl Mesh {
    pub fn new(
        local: SiteId,
        registry: Arc<PeerRegistry>,
        commands: mpsc::UnboundedSender<NodeCommand>,
    ) -> Self {
        Self {
            inner: Arc::new(MeshInner {
                local,
                registry,
                commands,
            }),
        }
    }

    pub fn local_site(&self) -> &SiteId {
        &self.inner.local
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.inner.registry
    }

    /// Accept peer connections until the task is dropped
    pub async fn serve(self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(site = %self.inner.local, addr = %addr, "Flood mesh listening");
        }

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let mesh = self.clone();
                    tokio::spawn(async move {
                        match mesh.attach(stream).await {
                            Ok(site) => debug!(site = %site, addr = %peer_addr, "Accepted peer"),
                            Err(e) => warn!(addr = %peer_addr, error = %e, "Rejected connection"),
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    /// Open a connection to `site` unless one exists already.
    /// Returns the site the remote end announced.
    pub async fn connect(&self, site: &SiteId) -> TransportResult<SiteId> {
        if self.inner.registry.contains(site) {
            return Ok(site.clone());
        }

        let stream = TcpStream::connect(site.as_str()).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::InvalidInput {
                TransportError::InvalidAddress(site.to_string())
            } else {
                TransportError::Io(e)
            }
        })?;
        self.attach(stream).await
    }

    /// Exchange greetings over a fresh connection and start its reader and
    /// writer tasks
    pub async fn attach(&self, stream: TcpStream) -> TransportResult<SiteId> {
        stream.set_nodelay(true)?;
        let (read, mut write) = stream.into_split();

        let greeting = serde_json::to_string(&Greeting {
            site: self.inner.local.clone(),
        })
        .map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
        write.write_all(&encode_frame(&greeting)).await?;

        let mut handler = ConnectionHandler::new(read);
        let frame = tokio::time::timeout(HANDSHAKE_TIMEOUT, handler.next_frame())
            .await
            .map_err(|_| TransportError::Handshake("timed out waiting for greeting".into()))??
            .ok_or_else(|| TransportError::Handshake("closed before greeting".into()))?;
        let remote: Greeting = serde_json::from_str(&frame)
            .map_err(|e| TransportError::Handshake(format!("bad greeting: {}", e)))?;
        let site = remote.site;

        if site == self.inner.local {
            return Err(TransportError::Handshake("connected to self".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if !self.inner.registry.register(site.clone(), tx) {
            return Err(TransportError::Handshake(format!("already connected to {}", site)));
        }

        info!(site = %site, peers = self.inner.registry.len(), "Peer connected");
        tokio::spawn(write_loop(site.clone(), write, rx));
        tokio::spawn(handler.run(site.clone(), self.inner.commands.clone()));

        Ok(site)
    }

    /// Close every connection. Queued frames are flushed first.
    pub fn close_all(&self) {
        for site in self.inner.registry.neighbours() {
            self.inner.registry.remove(&site);
        }
    }
}

/// Drain the outbound queue of one peer into its socket
async fn write_loop(site: SiteId, mut write: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(data) = rx.recv().await {
        if let Err(e) = write.write_all(&data).await {
            error!(site = %site, error = %e, "Write error");
            return;
        }
    }

    let _ = write.shutdown().await;
    debug!(site = %site, "Writer closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn mesh(listener: &TcpListener) -> (Mesh, mpsc::UnboundedReceiver<NodeCommand>) {
        let site = SiteId::new(listener.local_addr().unwrap().to_string()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (Mesh::new(site, Arc::new(PeerRegistry::new()), tx), rx)
    }

    #[tokio::test]
    async fn test_connect_exchanges_greetings() {
        let la = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let lb = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (a, _a_rx) = mesh(&la).await;
        let (b, mut b_rx) = mesh(&lb).await;
        tokio::spawn(b.clone().serve(lb));

        let remote = a.connect(b.local_site()).await.unwrap();
        assert_eq!(&remote, b.local_site());
        assert!(a.registry().contains(b.local_site()));

        a.registry().get(b.local_site()).unwrap().send("hello");

        let cmd = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match cmd {
            NodeCommand::Inbound { from, frame } => {
                assert_eq!(&from, a.local_site());
                assert_eq!(frame, "hello");
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(b.registry().contains(a.local_site()));
    }

    #[tokio::test]
    async fn test_connect_twice_reuses_connection() {
        let la = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let lb = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (a, _a_rx) = mesh(&la).await;
        let (b, _b_rx) = mesh(&lb).await;
        tokio::spawn(b.clone().serve(lb));

        a.connect(b.local_site()).await.unwrap();
        a.connect(b.local_site()).await.unwrap();
        assert_eq!(a.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_reports_peer_gone() {
        let la = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let lb = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (a, _a_rx) = mesh(&la).await;
        let (b, mut b_rx) = mesh(&lb).await;
        tokio::spawn(b.clone().serve(lb));

        a.connect(b.local_site()).await.unwrap();
        a.close_all();
        assert!(a.registry().is_empty());

        let cmd = tokio::time::timeout(Duration::from_secs(5), b_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(cmd, NodeCommand::PeerGone(site) if &site == a.local_site()));
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let la = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (a, _rx) = mesh(&la).await;

        // bind then drop to get a port nobody listens on
        let free = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = SiteId::new(free.local_addr().unwrap().to_string()).unwrap();
        drop(free);

        assert!(a.connect(&addr).await.is_err());
        assert!(a.registry().is_empty());
    }
}
