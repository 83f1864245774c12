//! LiveLink: a resilient connection manager for stateful remote services
//!
//! The manager owns one logical connection: it connects lazily, retries
//! operations with configurable backoff, probes the session in the background
//! and reconnects transparently when the remote side goes away.

pub mod config;
pub mod connection;
pub mod executor;
pub mod health;
pub mod logging;
pub mod remote;

#[cfg(test)]
mod testing;

pub use config::{ConnectionConfig, Settings};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionStatus};
pub use livelink_shared::{
    BackoffPolicy, ConfigError, ConnectionError, ConnectionState, ErrorKind, RemoteError,
    RetryConfig,
};
pub use remote::RemoteService;
