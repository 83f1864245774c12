//! Health Monitor
//!
//! Runs a background task that periodically probes the session and drives
//! bounded reconnection when a probe fails.

use crate::config::ConnectionConfig;
use crate::connection::{ConnectionEvent, Link};
use crate::executor::OperationExecutor;
use crate::remote::RemoteService;
use livelink_shared::{ConnectionError, ConnectionState, ErrorKind};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Probe `session`, bounded by `limit`
pub(crate) async fn probe_session<S: RemoteService>(
    link: &Link<S>,
    session: &S::Session,
    limit: std::time::Duration,
) -> Result<(), ConnectionError> {
    match timeout(limit, link.service().probe(session)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout(format!(
            "probe exceeded {}ms",
            limit.as_millis()
        ))),
    }
}

/// Periodic liveness checks with bounded, linear-backoff reconnection
pub struct HealthMonitor<S: RemoteService> {
    executor: Arc<OperationExecutor<S>>,
    config: ConnectionConfig,
}

/// Handle to stop health monitoring
pub struct HealthMonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop without waiting for the task to wind down
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Cancel the task and wait until it has exited
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!("[HEALTH] Monitor task panicked: {}", e);
            }
        }
    }
}

/// What the loop should do after handling a lost session
enum Recovery {
    Resume,
    Stop,
}

impl<S: RemoteService> HealthMonitor<S> {
    pub fn new(executor: Arc<OperationExecutor<S>>) -> Self {
        let config = executor.config().clone();
        Self { executor, config }
    }

    /// Start a monitor for `executor` unless one is already running
    pub fn ensure_running(executor: &Arc<OperationExecutor<S>>) {
        executor.link().with_monitor(|slot| {
            if slot.as_ref().is_some_and(HealthMonitorHandle::is_running) {
                return;
            }
            *slot = Some(HealthMonitor::new(Arc::clone(executor)).start());
        });
    }

    /// Spawn the monitoring loop
    pub fn start(self) -> HealthMonitorHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        HealthMonitorHandle { token, task }
    }

    fn link(&self) -> &Arc<Link<S>> {
        self.executor.link()
    }

    async fn run(self, token: CancellationToken) {
        info!(
            "[HEALTH] Monitoring started (every {}ms)",
            self.config.health_check_interval.as_millis()
        );

        loop {
            // Measured from the end of the previous probe, so slow probes never pile up
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(self.config.health_check_interval) => {}
            }

            match self.link().state().await {
                ConnectionState::Connected => {}
                ConnectionState::Connecting => continue,
                ConnectionState::Reconnecting => {
                    // Session was lost by an operation; recovery is ours
                    match self.recover(&token, None).await {
                        Recovery::Resume => continue,
                        Recovery::Stop => break,
                    }
                }
                ConnectionState::Disconnected | ConnectionState::Failed => break,
            }

            let Some(session) = self.link().session().await else {
                continue;
            };

            let result = tokio::select! {
                _ = token.cancelled() => break,
                r = probe_session(self.link(), &session, self.config.keep_alive_interval) => r,
            };

            match result {
                Ok(()) => {
                    debug!("[HEALTH] Probe ok");
                    self.link().record_health_check();
                }
                Err(e) => {
                    warn!("[HEALTH] Probe failed: {}", e);
                    self.link().record_error(&e).await;
                    self.link()
                        .emit(ConnectionEvent::HealthCheckFailed { error: e.clone() });

                    // Same guard as operation failures; a session installed
                    // since the probe started is left alone
                    let lost = self.executor.mark_suspect(&session, &e).await
                        || self.link().state().await == ConnectionState::Reconnecting;
                    if !lost {
                        continue;
                    }

                    match self.recover(&token, Some(e)).await {
                        Recovery::Resume => {}
                        Recovery::Stop => break,
                    }
                }
            }
        }

        info!("[HEALTH] Monitoring stopped");
    }

    /// Bounded reconnection loop, entered in `Reconnecting`
    async fn recover(&self, token: &CancellationToken, cause: Option<ConnectionError>) -> Recovery {
        let mut last_error = cause;

        if self.config.auto_reconnect {
            for attempt in 1..=self.config.max_reconnect_attempts {
                let delay = self.config.reconnect_base_delay.saturating_mul(attempt);
                tokio::select! {
                    _ = token.cancelled() => return Recovery::Stop,
                    _ = sleep(delay) => {}
                }

                let result = tokio::select! {
                    _ = token.cancelled() => return Recovery::Stop,
                    r = self.executor.reconnect_once() => r,
                };

                match result {
                    Ok(()) => {
                        info!("[HEALTH] Reconnected after {} attempt(s)", attempt);
                        self.link().emit(ConnectionEvent::Reconnected { attempts: attempt });
                        return Recovery::Resume;
                    }
                    // Disconnected or failed underneath us
                    Err(e) if e.kind() == ErrorKind::Unavailable => return Recovery::Stop,
                    Err(e) => {
                        warn!(
                            "[HEALTH] Reconnect attempt {}/{} failed: {}",
                            attempt, self.config.max_reconnect_attempts, e
                        );
                        last_error = Some(e);
                    }
                }
            }
        }

        let attempts = if self.config.auto_reconnect {
            self.config.max_reconnect_attempts
        } else {
            0
        };

        match self
            .link()
            .transition_from(ConnectionState::Reconnecting, ConnectionState::Failed)
            .await
        {
            Ok(true) => {
                error!(
                    "[HEALTH] Giving up after {} reconnect attempt(s); connection failed",
                    attempts
                );
                self.link().emit(ConnectionEvent::ReconnectFailed {
                    attempts,
                    error: last_error,
                });
                Recovery::Stop
            }
            // Someone else restored (or tore down) the connection meanwhile
            Ok(false) => match self.link().state().await {
                ConnectionState::Connected => Recovery::Resume,
                _ => Recovery::Stop,
            },
            Err(e) => {
                error!("[HEALTH] {}", e);
                Recovery::Stop
            }
        }
    }
}
