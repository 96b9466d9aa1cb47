//! Error types for Flood Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid site ID: {0}")]
    InvalidSiteId(String),

    #[error("Malformed clock: {0}")]
    MalformedClock(String),
}

/// Result type alias for Flood Core operations
pub type Result<T> = std::result::Result<T, Error>;
