//! Flood Core - causal clocks and session state
//!
//! This crate provides the building blocks of the Flood editing mesh:
//! - Site identifiers for peers
//! - The causal (vector) clock used to order delivery
//! - A typed event bus for delivered operations and membership events
//! - The shared session (title, alias, participants, document snapshot)

pub mod clock;
pub mod error;
pub mod events;
pub mod session;
pub mod site;

pub use clock::{CausalClock, ClockEntry};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventKind, ListenerId, Payload};
pub use session::{Participant, Session, SharedDocument};
pub use site::SiteId;
