//! Connection State Machine
//!
//! Defines the lifecycle of the single logical connection and which
//! transitions between lifecycle states are legal.

use crate::error::InvalidTransition;
use crate::now_ms;
use std::fmt;

/// Lifecycle state of the logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session is held
    Disconnected,
    /// First connection attempt in progress
    Connecting,
    /// A live session is held
    Connected,
    /// The session was lost and a fresh one is being opened
    Reconnecting,
    /// Connection could not be (re)established; needs an explicit connect
    Failed,
}

impl ConnectionState {
    /// All states, in lifecycle order
    pub const ALL: [ConnectionState; 5] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
        ConnectionState::Failed,
    ];
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Check if a transition from one state to another is legal
pub fn is_legal(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    matches!(
        (from, to),
        (Disconnected, Connecting)
            | (Connecting, Connected)
            | (Connecting, Failed)
            | (Connected, Reconnecting)
            | (Connected, Disconnected)
            | (Reconnecting, Connected)
            | (Reconnecting, Failed)
            // Manual retry
            | (Failed, Connecting)
    )
}

/// Tracks the current connection state and enforces legal transitions
#[derive(Debug)]
pub struct ConnectionStateMachine {
    current_state: ConnectionState,
    last_error: Option<String>,
    last_transition_ms: u64,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self {
            current_state: ConnectionState::Disconnected,
            last_error: None,
            last_transition_ms: now_ms(),
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.current_state
    }

    /// Last error recorded against the connection, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Timestamp (ms since Unix epoch) of the last state change
    pub fn last_transition_ms(&self) -> u64 {
        self.last_transition_ms
    }

    /// Record an error for observability. Never affects transitions.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
    }

    /// Move to `to` if the transition is legal.
    ///
    /// An illegal transition leaves the state untouched.
    pub fn transition(&mut self, to: ConnectionState) -> Result<(), InvalidTransition> {
        let from = self.current_state;
        if !is_legal(from, to) {
            return Err(InvalidTransition { from, to });
        }

        self.current_state = to;
        self.last_transition_ms = now_ms();
        Ok(())
    }

    /// Return to Disconnected from any state.
    ///
    /// Only used by an explicit teardown; returns the state that was left.
    pub fn reset(&mut self) -> ConnectionState {
        let from = self.current_state;
        if from != ConnectionState::Disconnected {
            self.current_state = ConnectionState::Disconnected;
            self.last_transition_ms = now_ms();
        }
        from
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    /// Drive a fresh machine into `target` using only legal transitions
    fn machine_in(target: ConnectionState) -> ConnectionStateMachine {
        let mut fsm = ConnectionStateMachine::new();
        let path: &[ConnectionState] = match target {
            Disconnected => &[],
            Connecting => &[Connecting],
            Connected => &[Connecting, Connected],
            Reconnecting => &[Connecting, Connected, Reconnecting],
            Failed => &[Connecting, Failed],
        };
        for step in path {
            fsm.transition(*step).expect("legal path");
        }
        assert_eq!(fsm.state(), target);
        fsm
    }

    #[test]
    fn test_initial_state() {
        let fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.state(), Disconnected);
        assert!(fsm.last_error().is_none());
    }

    #[test]
    fn test_normal_lifecycle() {
        let mut fsm = ConnectionStateMachine::new();
        fsm.transition(Connecting).unwrap();
        fsm.transition(Connected).unwrap();
        fsm.transition(Reconnecting).unwrap();
        fsm.transition(Connected).unwrap();
        fsm.transition(Disconnected).unwrap();
        assert_eq!(fsm.state(), Disconnected);
    }

    #[test]
    fn test_failed_requires_manual_connect() {
        let mut fsm = machine_in(Reconnecting);
        fsm.transition(Failed).unwrap();

        assert!(fsm.transition(Connected).is_err());
        assert!(fsm.transition(Reconnecting).is_err());
        fsm.transition(Connecting).unwrap();
    }

    #[test]
    fn test_every_illegal_pair_is_rejected_and_state_kept() {
        for from in ConnectionState::ALL {
            for to in ConnectionState::ALL {
                let mut fsm = machine_in(from);
                let result = fsm.transition(to);

                if is_legal(from, to) {
                    assert!(result.is_ok(), "{from} -> {to} should be legal");
                    assert_eq!(fsm.state(), to);
                } else {
                    let err = result.expect_err("illegal transition accepted");
                    assert_eq!(err, InvalidTransition { from, to });
                    assert_eq!(fsm.state(), from, "state changed on {from} -> {to}");
                }
            }
        }
    }

    #[test]
    fn test_legal_table_size() {
        let legal = ConnectionState::ALL
            .iter()
            .flat_map(|f| ConnectionState::ALL.iter().map(move |t| (*f, *t)))
            .filter(|(f, t)| is_legal(*f, *t))
            .count();
        assert_eq!(legal, 8);
    }

    #[test]
    fn test_recorded_error_does_not_block_transitions() {
        let mut fsm = machine_in(Connecting);
        fsm.record_error("connection refused");
        fsm.transition(Failed).unwrap();
        assert_eq!(fsm.last_error(), Some("connection refused"));
    }

    #[test]
    fn test_reset_from_any_state() {
        for from in ConnectionState::ALL {
            let mut fsm = machine_in(from);
            assert_eq!(fsm.reset(), from);
            assert_eq!(fsm.state(), Disconnected);
        }
    }
}
