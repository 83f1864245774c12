//! Remote service abstraction consumed by the connection manager

use async_trait::async_trait;
use livelink_shared::ConnectionError;
use std::sync::Arc;

/// Capability to reach a stateful remote service.
///
/// The manager never builds a `Session` itself; it asks the service to open
/// one, keeps it, probes it and hands it to operations.
#[async_trait]
pub trait RemoteService: Send + Sync + 'static {
    /// An established, authenticated session
    type Session: Send + Sync + 'static;

    /// Open a fresh session
    async fn open(&self) -> Result<Self::Session, ConnectionError>;

    /// Lightweight, side-effect-free liveness check
    async fn probe(&self, session: &Self::Session) -> Result<(), ConnectionError>;

    /// Release a session that the manager has retired
    async fn close(&self, session: Arc<Self::Session>);

    /// Human-readable name for logs
    fn name(&self) -> &'static str {
        "remote"
    }
}
