//! LiveLink Shared Types
//!
//! Runtime-independent building blocks of the connection manager: the
//! connection state machine, retry policy, error taxonomy and the frame
//! codec used by the demo TCP service.

pub mod codec;
pub mod error;
pub mod retry;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

pub use error::{ConfigError, ConnectionError, ErrorKind, InvalidTransition, RemoteError};
pub use retry::{BackoffPolicy, RetryConfig, RetryPolicy};
pub use state_machine::{ConnectionState, ConnectionStateMachine};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Default connection parameters
pub mod defaults {
    /// Bound on a single connect attempt
    pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Bound on a single health probe
    pub const KEEP_ALIVE_INTERVAL_MS: u64 = 5_000;

    /// Pause between health probes
    pub const HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

    /// Reconnection attempts after a failed probe before giving up
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Reconnection delay unit; attempt `n` waits `n` units
    pub const RECONNECT_BASE_DELAY_MS: u64 = 1_000;
}

/// Serde adapter for durations expressed in whole milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }
}
