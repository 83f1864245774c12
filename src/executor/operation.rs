//! Operation executor - connection assurance and retries around remote calls

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionEvent, Link};
use crate::health::HealthMonitor;
use crate::remote::RemoteService;
use livelink_shared::{ConnectionError, ConnectionState, RetryPolicy};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Why a connection attempt is being made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    /// Caller-requested connect (also the lazy connect inside `execute`)
    Connect,
    /// Health monitor recovering a lost session
    Reconnect,
}

/// Runs remote operations with connection assurance and retries
pub struct OperationExecutor<S: RemoteService> {
    link: Arc<Link<S>>,
    policy: RetryPolicy,
    config: ConnectionConfig,
    /// Serializes connection attempts and remembers the latest outcome
    connect_guard: Mutex<Option<Result<(), ConnectionError>>>,
    /// Bumped each time an attempt completes under the guard
    connect_epoch: AtomicU64,
}

impl<S: RemoteService> OperationExecutor<S> {
    pub fn new(link: Arc<Link<S>>, policy: RetryPolicy, config: ConnectionConfig) -> Self {
        Self {
            link,
            policy,
            config,
            connect_guard: Mutex::new(None),
            connect_epoch: AtomicU64::new(0),
        }
    }

    pub fn link(&self) -> &Arc<Link<S>> {
        &self.link
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Establish the connection if it is not already up.
    ///
    /// Callers arriving while an attempt is in flight get that attempt's outcome.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.guarded(Intent::Connect, None).await
    }

    /// One reconnection attempt from `Reconnecting`; used by the health monitor
    pub async fn reconnect_once(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.guarded(Intent::Reconnect, None).await
    }

    async fn guarded(
        self: &Arc<Self>,
        intent: Intent,
        disconnect_epoch: Option<u64>,
    ) -> Result<(), ConnectionError> {
        let observed = self.connect_epoch.load(Ordering::SeqCst);
        let mut last = self.connect_guard.lock().await;

        if self.connect_epoch.load(Ordering::SeqCst) != observed {
            if let Some(outcome) = last.as_ref() {
                debug!("[EXEC] Joined in-flight connection attempt");
                return outcome.clone();
            }
        }

        if let Some(expected) = disconnect_epoch {
            if self.link.current_disconnect_epoch() != expected {
                return Err(ConnectionError::Unavailable(ConnectionState::Disconnected));
            }
        }

        let outcome = self.establish(intent).await;
        *last = Some(outcome.clone());
        self.connect_epoch.fetch_add(1, Ordering::SeqCst);
        outcome
    }

    async fn establish(self: &Arc<Self>, intent: Intent) -> Result<(), ConnectionError> {
        use ConnectionState::*;

        match (intent, self.link.state().await) {
            (_, Connected) => Ok(()),
            (_, Reconnecting) => self.reopen(intent).await,
            (Intent::Connect, Disconnected | Failed) => {
                self.link.transition(Connecting).await?;
                self.open_fresh().await
            }
            // Left behind by a connect future that was dropped mid-attempt
            (Intent::Connect, Connecting) => self.open_fresh().await,
            (Intent::Reconnect, state) => Err(ConnectionError::Unavailable(state)),
        }
    }

    /// Connecting -> Connected | Failed
    async fn open_fresh(self: &Arc<Self>) -> Result<(), ConnectionError> {
        match self.open_session().await {
            Ok(session) => {
                let retired = self.link.replace_session(session).await;
                self.link.transition(ConnectionState::Connected).await?;
                HealthMonitor::ensure_running(self);
                self.link.retire(retired).await;
                info!("[EXEC] Connected to {} service", self.link.service().name());
                Ok(())
            }
            Err(e) => {
                warn!("[EXEC] Connect failed: {}", e);
                self.link.record_error(&e).await;
                self.link.transition(ConnectionState::Failed).await?;
                Err(e)
            }
        }
    }

    /// Reconnecting -> Connected with a fresh session; stays Reconnecting on failure.
    ///
    /// The monitor announces its own reconnects with the attempt count; a
    /// reconnect on behalf of a caller is announced here.
    async fn reopen(self: &Arc<Self>, intent: Intent) -> Result<(), ConnectionError> {
        self.link.stats().record_reconnect_attempt();

        match self.open_session().await {
            Ok(session) => {
                let retired = self.link.replace_session(session).await;
                self.link.transition(ConnectionState::Connected).await?;
                HealthMonitor::ensure_running(self);
                self.link.retire(retired).await;
                info!("[EXEC] Reconnected to {} service", self.link.service().name());
                if intent == Intent::Connect {
                    self.link.emit(ConnectionEvent::Reconnected { attempts: 1 });
                }
                Ok(())
            }
            Err(e) => {
                warn!("[EXEC] Reconnect failed: {}", e);
                self.link.record_error(&e).await;
                Err(e)
            }
        }
    }

    async fn open_session(&self) -> Result<Arc<S::Session>, ConnectionError> {
        self.link.stats().record_connection_attempt();

        let limit = self.config.connect_timeout;
        match timeout(limit, self.link.service().open()).await {
            Ok(Ok(session)) => Ok(Arc::new(session)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectionError::Timeout(format!(
                "connect exceeded {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Release the session and return to Disconnected, serialized with connects
    pub(crate) async fn teardown(&self) -> Option<Arc<S::Session>> {
        let _guard = self.connect_guard.lock().await;
        let session = self.link.take_session().await;

        let moved = self
            .link
            .transition_from(ConnectionState::Connected, ConnectionState::Disconnected)
            .await
            .unwrap_or(false);
        if !moved {
            self.link.reset().await;
        }

        session
    }

    /// Mark `session` lost after a connection-level failure.
    ///
    /// Serialized with connection attempts, so a session installed meanwhile
    /// is never demoted. Returns whether the state moved to `Reconnecting`.
    pub(crate) async fn mark_suspect(
        &self,
        session: &Arc<S::Session>,
        cause: &ConnectionError,
    ) -> bool {
        let _guard = self.connect_guard.lock().await;
        if !self.link.is_current(session).await {
            return false;
        }

        match self
            .link
            .transition_from(ConnectionState::Connected, ConnectionState::Reconnecting)
            .await
        {
            Ok(true) => {
                warn!("[EXEC] Session lost ({}), reconnecting", cause);
                self.link.record_error(cause).await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!("[EXEC] {}", e);
                false
            }
        }
    }

    /// Current session, connecting first if needed
    async fn ready_session(
        self: &Arc<Self>,
        disconnect_epoch: Option<u64>,
    ) -> Result<Arc<S::Session>, ConnectionError> {
        if self.link.state().await == ConnectionState::Connected {
            if let Some(session) = self.link.session().await {
                return Ok(session);
            }
        }

        self.guarded(Intent::Connect, disconnect_epoch).await?;

        let state = self.link.state().await;
        match self.link.session().await {
            Some(session) if state == ConnectionState::Connected => Ok(session),
            _ => Err(ConnectionError::Transient(format!(
                "connection not ready (state: {state})"
            ))),
        }
    }

    /// Run `op` once against a ready session
    async fn attempt<T, F, Fut>(
        self: &Arc<Self>,
        op: &mut F,
        disconnect_epoch: Option<u64>,
    ) -> Result<T, ConnectionError>
    where
        F: FnMut(Arc<S::Session>) -> Fut,
        Fut: Future<Output = Result<T, ConnectionError>>,
    {
        let session = self.ready_session(disconnect_epoch).await?;
        let result = op(Arc::clone(&session)).await;

        if let Err(e) = &result {
            if e.kind().is_connection_level() {
                self.mark_suspect(&session, e).await;
            }
        }
        result
    }

    /// Run a remote operation with connection assurance and retries.
    ///
    /// The error returned is always the last one observed, unchanged.
    pub async fn execute<T, F, Fut>(
        self: &Arc<Self>,
        name: &str,
        mut op: F,
    ) -> Result<T, ConnectionError>
    where
        F: FnMut(Arc<S::Session>) -> Fut,
        Fut: Future<Output = Result<T, ConnectionError>>,
    {
        let stats = self.link.stats();
        stats.record_request();

        // A failed connection stays failed until a caller reconnects explicitly
        let state = self.link.state().await;
        if state == ConnectionState::Failed {
            let err = ConnectionError::Unavailable(state);
            stats.record_failure(&err);
            warn!(operation = name, "[EXEC] Rejected: connection has failed");
            return Err(err);
        }

        if !self.policy.config().enabled {
            return self.execute_once(name, op).await;
        }

        let mut disconnects = self.link.disconnect_epoch();
        let epoch = *disconnects.borrow_and_update();

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1u32;

        loop {
            let started = Instant::now();
            let result = if self.link.current_disconnect_epoch() != epoch {
                Err(ConnectionError::Unavailable(ConnectionState::Disconnected))
            } else {
                self.attempt(&mut op, Some(epoch)).await
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let err = match result {
                Ok(value) => {
                    stats.record_success();
                    info!(
                        operation = name,
                        attempt,
                        outcome = "success",
                        elapsed_ms,
                        "[EXEC] Operation completed"
                    );
                    return Ok(value);
                }
                Err(e) => e,
            };

            stats.record_attempt_failure(&err);

            if !err.is_retryable() || attempt >= max_attempts {
                warn!(
                    operation = name,
                    attempt,
                    outcome = "failed",
                    elapsed_ms,
                    error = %err,
                    "[EXEC] Operation failed"
                );
                return Err(err);
            }

            let delay = self.policy.next_delay(attempt);
            warn!(
                operation = name,
                attempt,
                outcome = "retry",
                elapsed_ms,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "[EXEC] Operation failed, will retry"
            );

            // A disconnect wakes the sleep so the next iteration fails fast
            tokio::select! {
                _ = sleep(delay) => {}
                _ = disconnects.changed() => {}
            }
            attempt += 1;
        }
    }

    /// Retries disabled: one connect if needed, one call, result verbatim
    async fn execute_once<T, F, Fut>(
        self: &Arc<Self>,
        name: &str,
        mut op: F,
    ) -> Result<T, ConnectionError>
    where
        F: FnMut(Arc<S::Session>) -> Fut,
        Fut: Future<Output = Result<T, ConnectionError>>,
    {
        let started = Instant::now();
        let result = self.attempt(&mut op, None).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => {
                self.link.stats().record_success();
                info!(
                    operation = name,
                    attempt = 1,
                    outcome = "success",
                    elapsed_ms,
                    "[EXEC] Operation completed"
                );
            }
            Err(e) => {
                self.link.stats().record_failure(e);
                warn!(
                    operation = name,
                    attempt = 1,
                    outcome = "failed",
                    elapsed_ms,
                    error = %e,
                    "[EXEC] Operation failed"
                );
            }
        }
        result
    }
}
