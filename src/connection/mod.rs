//! Connection management for a single stateful remote service
//!
//! This module handles:
//! - The shared connection state (state machine, session, events)
//! - The public façade handed to collaborators
//! - Channel-based event delivery

mod events;
mod link;
mod manager;

pub use events::{ConnectionEvent, EVENT_CHANNEL_CAPACITY};
pub use link::Link;
pub use manager::{ConnectionManager, ConnectionStatus};
