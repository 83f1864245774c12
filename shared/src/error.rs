//! Error taxonomy for the connection manager
//!
//! Errors are classified once, where the remote call returns. Retry logic
//! branches on [`ErrorKind`], never on message text.

use crate::state_machine::ConnectionState;
use thiserror::Error;

/// An illegal state machine transition. Indicates a bug, never retried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid connection state transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// A well-formed error returned by the remote service for one operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Remote error {code}: {message}")]
pub struct RemoteError {
    pub code: u16,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors surfaced by the connection manager and remote services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Transient connection failure: {0}")]
    Transient(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Connection unavailable (state: {0})")]
    Unavailable(ConnectionState),
}

/// Retry-relevant classification of a [`ConnectionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credentials rejected
    Authentication,
    /// Connect or operation exceeded its allotted time
    Timeout,
    /// Network-level failure (refused, reset, DNS)
    Transient,
    /// State machine invariant violated
    Fatal,
    /// Remote service rejected the operation
    Remote,
    /// Manager is failed or was disconnected
    Unavailable,
}

impl ErrorKind {
    /// Whether the operation executor may retry an error of this kind
    pub fn is_retryable(self) -> bool {
        match self {
            ErrorKind::Timeout | ErrorKind::Transient | ErrorKind::Remote => true,
            ErrorKind::Authentication | ErrorKind::Fatal | ErrorKind::Unavailable => false,
        }
    }

    /// Whether the error suggests the session itself is no longer usable
    pub fn is_connection_level(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::Transient)
    }
}

impl ConnectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Authentication(_) => ErrorKind::Authentication,
            ConnectionError::Timeout(_) => ErrorKind::Timeout,
            ConnectionError::Transient(_) => ErrorKind::Transient,
            ConnectionError::InvalidTransition(_) => ErrorKind::Fatal,
            ConnectionError::Remote(_) => ErrorKind::Remote,
            ConnectionError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Classify an I/O error from a socket into the taxonomy
    pub fn from_io(context: &str, e: &std::io::Error) -> Self {
        use std::io::ErrorKind as Io;

        match e.kind() {
            Io::TimedOut | Io::WouldBlock => ConnectionError::Timeout(format!("{context}: {e}")),
            Io::PermissionDenied => ConnectionError::Authentication(format!("{context}: {e}")),
            _ => ConnectionError::Transient(format!("{context}: {e}")),
        }
    }
}

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("initial_delay must be greater than zero")]
    ZeroInitialDelay,

    #[error("max_delay ({max_ms}ms) must not be below initial_delay ({initial_ms}ms)")]
    MaxBelowInitial { initial_ms: u128, max_ms: u128 },

    #[error("exponential policy needs multiplier > 1 (got {0})")]
    Multiplier(f64),

    #[error("health_check_interval must be greater than zero")]
    ZeroHealthCheckInterval,

    #[error("connect_timeout must be greater than zero")]
    ZeroConnectTimeout,

    #[error("keep_alive_interval must be greater than zero")]
    ZeroKeepAliveInterval,
}
