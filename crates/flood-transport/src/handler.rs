//! Connection handler - frames inbound bytes and hands them to the node

use crate::error::{TransportError, TransportResult};
use crate::node::NodeCommand;
use flood_core::SiteId;
use flood_protocol::{Framer, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reads one peer connection
pub struct ConnectionHandler<R> {
    reader: R,
    framer: Framer,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> ConnectionHandler<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            framer: Framer::new(),
            buf: vec![0u8; 4096],
        }
    }

    /// Read until one complete frame is available. `None` on end of stream.
    pub async fn next_frame(&mut self) -> TransportResult<Option<String>> {
        loop {
            if let Some(frame) = self.framer.next_frame()? {
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                if self.framer.pending() > 0 {
                    debug!(bytes = self.framer.pending(), "Discarding unterminated frame");
                }
                return Ok(None);
            }
            self.framer.feed(&self.buf[..n])?;
        }
    }

    /// Forward every frame from `site` to the node until the connection ends,
    /// then report the peer as gone
    pub async fn run(mut self, site: SiteId, commands: mpsc::UnboundedSender<NodeCommand>) {
        loop {
            match self.next_frame().await {
                Ok(Some(frame)) => {
                    let inbound = NodeCommand::Inbound {
                        from: site.clone(),
                        frame,
                    };
                    if commands.send(inbound).is_err() {
                        return;
                    }
                }
                Ok(None) => {
                    info!(site = %site, "Peer closed connection");
                    break;
                }
                Err(TransportError::Protocol(ProtocolError::InvalidFrame(e))) => {
                    warn!(site = %site, error = %e, "Skipping undecodable frame");
                }
                Err(e) => {
                    error!(site = %site, error = %e, "Read error");
                    break;
                }
            }
        }

        let _ = commands.send(NodeCommand::PeerGone(site));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_frames_across_reads() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut handler = ConnectionHandler::new(server);

        client.write_all(b"{\"site\":").await.unwrap();
        client.write_all(b"\"a\"}\nsecond\n").await.unwrap();
        drop(client);

        assert_eq!(handler.next_frame().await.unwrap().as_deref(), Some("{\"site\":\"a\"}"));
        assert_eq!(handler.next_frame().await.unwrap().as_deref(), Some("second"));
        assert_eq!(handler.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_reports_peer_gone() {
        let (mut client, server) = tokio::io::duplex(256);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let site = SiteId::new("127.0.0.1:9000").unwrap();

        let task = tokio::spawn(ConnectionHandler::new(server).run(site.clone(), tx));

        client.write_all(b"one\n\xff\nthree\n").await.unwrap();
        drop(client);
        task.await.unwrap();

        let mut frames = Vec::new();
        let mut gone = false;
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                NodeCommand::Inbound { from, frame } => {
                    assert_eq!(from, site);
                    frames.push(frame);
                }
                NodeCommand::PeerGone(s) => {
                    assert_eq!(s, site);
                    gone = true;
                }
                other => panic!("unexpected command {:?}", other),
            }
        }

        assert_eq!(frames, vec!["one", "three"]);
        assert!(gone);
    }
}
