//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Unknown message kind: {0}")]
    UnknownMessageKind(u8),

    #[error("Invalid parameters: {0}")]
    InvalidParam(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Malformed data: unknown operation type {0:?}")]
    MalformedPayload(String),

    #[error("Core error: {0}")]
    Core(#[from] flood_core::Error),
}

impl ProtocolError {
    /// Short code sent back to the peer in an error envelope
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidJson(_) => "INVALID_JSON",
            ProtocolError::InvalidEnvelope(_) => "INVALID_ENVELOPE",
            ProtocolError::UnknownMessageKind(_) => "UNKNOWN_KIND",
            ProtocolError::InvalidParam(_) => "INVALID_PARAM",
            ProtocolError::InvalidFrame(_) => "INVALID_FRAME",
            ProtocolError::MessageTooLarge { .. } => "TOO_LARGE",
            ProtocolError::MalformedPayload(_) => "MALFORMED_DATA",
            ProtocolError::Core(_) => "CORE_ERROR",
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
