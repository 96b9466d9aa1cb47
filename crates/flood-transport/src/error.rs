//! Transport error types

use flood_protocol::ProtocolError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Node has shut down")]
    NodeClosed,
}

pub type TransportResult<T> = Result<T, TransportError>;
