//! Connection events delivered to subscribers over a broadcast channel

use livelink_shared::{ConnectionError, ConnectionState};

/// Capacity of the event channel; slow subscribers observe `Lagged`
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state machine moved
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A background health probe failed
    HealthCheckFailed { error: ConnectionError },
    /// A fresh session replaced a lost one
    Reconnected { attempts: u32 },
    /// Reconnection gave up; the manager is now failed
    ReconnectFailed {
        attempts: u32,
        error: Option<ConnectionError>,
    },
}
