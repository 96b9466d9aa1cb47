//! Flood Protocol - causal broadcast between mesh peers
//!
//! Frames are newline-delimited JSON envelopes:
//!
//! ## Envelope
//! ```text
//! {"error": null, "data": {"key": <kind>, "vv": <clock>, "param": {...}}}
//! {"error": {"key": <code>, "description": <text>}, "data": null}
//! ```
//!
//! ## Message kinds
//! ```text
//! 0 JoinRequest   {alias}
//! 1 JoinResponse  {title, alias, doc, vv, participants}
//! 2 Data          {type: "insertion"|"deletion", data}
//! 3 Disconnect
//! 4 Ready         {alias}
//! 5 AckReady      {alias}
//! ```

pub mod codec;
pub mod connections;
pub mod engine;
pub mod error;
pub mod message;

pub use codec::{encode_frame, Framer};
pub use connections::{Channel, Connections, MemoryConnections};
pub use engine::{EngineConfig, ProtocolEngine};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{
    AliasParam, DataParam, DataRecord, Envelope, ErrorRecord, JoinResponseParam, Message,
    MessageKind, Operation,
};
