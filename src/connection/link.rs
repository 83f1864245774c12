//! State shared by the executor, the health monitor and the façade

use super::events::{ConnectionEvent, EVENT_CHANNEL_CAPACITY};
use crate::executor::OperationStats;
use crate::health::HealthMonitorHandle;
use crate::remote::RemoteService;
use livelink_shared::{now_ms, ConnectionState, ConnectionStateMachine, InvalidTransition};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, watch, RwLock};
use tracing::{error, info};

/// The single logical connection: state, session and bookkeeping
pub struct Link<S: RemoteService> {
    service: S,
    fsm: RwLock<ConnectionStateMachine>,
    session: RwLock<Option<Arc<S::Session>>>,
    stats: OperationStats,
    events: broadcast::Sender<ConnectionEvent>,
    /// 0 until the first successful probe
    last_health_check_ms: AtomicU64,
    /// Bumped by every explicit disconnect
    disconnects: watch::Sender<u64>,
    /// Background health monitor, if one was started
    monitor: Mutex<Option<HealthMonitorHandle>>,
}

impl<S: RemoteService> Link<S> {
    pub fn new(service: S) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (disconnects, _) = watch::channel(0);

        Self {
            service,
            fsm: RwLock::new(ConnectionStateMachine::new()),
            session: RwLock::new(None),
            stats: OperationStats::default(),
            events,
            last_health_check_ms: AtomicU64::new(0),
            disconnects,
            monitor: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn stats(&self) -> &OperationStats {
        &self.stats
    }

    pub async fn state(&self) -> ConnectionState {
        self.fsm.read().await.state()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.fsm.read().await.last_error().map(str::to_owned)
    }

    pub async fn last_transition_ms(&self) -> u64 {
        self.fsm.read().await.last_transition_ms()
    }

    pub async fn record_error(&self, error: &impl ToString) {
        self.fsm.write().await.record_error(error.to_string());
    }

    /// Apply a transition under the state lock and announce it
    pub async fn transition(&self, to: ConnectionState) -> Result<(), InvalidTransition> {
        let mut fsm = self.fsm.write().await;
        let from = fsm.state();
        if let Err(e) = fsm.transition(to) {
            error!("[CONN] {}", e);
            return Err(e);
        }
        drop(fsm);

        self.announce(from, to);
        Ok(())
    }

    /// Transition only if the current state is still `expected`.
    ///
    /// Returns `Ok(false)` when another task already moved the state.
    pub async fn transition_from(
        &self,
        expected: ConnectionState,
        to: ConnectionState,
    ) -> Result<bool, InvalidTransition> {
        let mut fsm = self.fsm.write().await;
        if fsm.state() != expected {
            return Ok(false);
        }
        fsm.transition(to)?;
        drop(fsm);

        self.announce(expected, to);
        Ok(true)
    }

    /// Force the machine back to Disconnected (explicit teardown only)
    pub async fn reset(&self) {
        let from = self.fsm.write().await.reset();
        if from != ConnectionState::Disconnected {
            self.announce(from, ConnectionState::Disconnected);
        }
    }

    fn announce(&self, from: ConnectionState, to: ConnectionState) {
        info!("[CONN] State: {} -> {}", from, to);
        let _ = self.events.send(ConnectionEvent::StateChanged { from, to });
    }

    pub fn emit(&self, event: ConnectionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> Option<Arc<S::Session>> {
        self.session.read().await.clone()
    }

    /// Whether `session` is the one currently held
    pub async fn is_current(&self, session: &Arc<S::Session>) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    /// Install a fresh session, returning the retired one
    pub async fn replace_session(&self, session: Arc<S::Session>) -> Option<Arc<S::Session>> {
        self.session.write().await.replace(session)
    }

    pub async fn take_session(&self) -> Option<Arc<S::Session>> {
        self.session.write().await.take()
    }

    /// Hand a retired session back to the service
    pub async fn retire(&self, session: Option<Arc<S::Session>>) {
        if let Some(session) = session {
            self.service.close(session).await;
        }
    }

    pub fn record_health_check(&self) {
        self.last_health_check_ms.store(now_ms(), Ordering::SeqCst);
    }

    pub fn last_health_check_ms(&self) -> Option<u64> {
        match self.last_health_check_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Run `f` with exclusive access to the monitor slot
    pub(crate) fn with_monitor<R>(
        &self,
        f: impl FnOnce(&mut Option<HealthMonitorHandle>) -> R,
    ) -> R {
        let mut slot = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut slot)
    }

    pub(crate) fn take_monitor(&self) -> Option<HealthMonitorHandle> {
        self.with_monitor(Option::take)
    }

    pub fn disconnect_epoch(&self) -> watch::Receiver<u64> {
        self.disconnects.subscribe()
    }

    pub fn current_disconnect_epoch(&self) -> u64 {
        *self.disconnects.borrow()
    }

    /// Signal in-flight operations that the caller asked to disconnect
    pub fn bump_disconnect_epoch(&self) {
        self.disconnects.send_modify(|epoch| *epoch += 1);
    }
}
