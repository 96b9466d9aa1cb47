//! Flood Transport Layer
//!
//! Runs a protocol engine over a TCP mesh:
//! - Mesh: accepts and dials peer connections, one greeting frame each way
//! - Registry: open connections, exposed to the engine as its connection provider
//! - Node: a single task owning the engine, fed through a command queue

pub mod error;
pub mod handler;
pub mod node;
pub mod registry;
pub mod tcp;

pub use error::{TransportError, TransportResult};
pub use handler::ConnectionHandler;
pub use node::{Node, NodeCommand, NodeConfig, NodeHandle, NodeStatus};
pub use registry::PeerRegistry;
pub use tcp::{Mesh, HANDSHAKE_TIMEOUT};
