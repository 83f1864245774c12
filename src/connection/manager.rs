//! Connection manager façade
//!
//! Composes the state machine, operation executor and health monitor behind
//! one cloneable handle that collaborators receive from the composition root.

use super::events::ConnectionEvent;
use super::link::Link;
use crate::config::ConnectionConfig;
use crate::executor::{OperationExecutor, StatsSnapshot};
use crate::health::probe_session;
use crate::remote::RemoteService;
use livelink_shared::{ConfigError, ConnectionError, ConnectionState, RetryConfig, RetryPolicy};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Read-only snapshot for health endpoints and logs
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub stats: StatsSnapshot,
    /// ms since Unix epoch of the last successful probe
    pub last_health_check: Option<u64>,
    /// ms since Unix epoch of the last state change
    pub last_transition: u64,
}

struct ManagerInner<S: RemoteService> {
    executor: Arc<OperationExecutor<S>>,
}

impl<S: RemoteService> Drop for ManagerInner<S> {
    fn drop(&mut self) {
        // The monitor task holds the executor; make sure it does not outlive every handle
        if let Some(handle) = self.executor.link().take_monitor() {
            handle.cancel();
        }
    }
}

/// Manages one logical connection to a remote service
pub struct ConnectionManager<S: RemoteService> {
    inner: Arc<ManagerInner<S>>,
}

impl<S: RemoteService> Clone for ConnectionManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RemoteService> ConnectionManager<S> {
    /// Create a manager in `Disconnected` state; nothing runs until `connect`
    pub fn new(
        service: S,
        retry: RetryConfig,
        connection: ConnectionConfig,
    ) -> Result<Self, ConfigError> {
        retry.validate()?;
        connection.validate()?;

        let link = Arc::new(Link::new(service));
        let executor = OperationExecutor::new(link, RetryPolicy::new(retry), connection);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                executor: Arc::new(executor),
            }),
        })
    }

    fn executor(&self) -> &Arc<OperationExecutor<S>> {
        &self.inner.executor
    }

    fn link(&self) -> &Arc<Link<S>> {
        self.executor().link()
    }

    /// The injected remote service
    pub fn service(&self) -> &S {
        self.link().service()
    }

    /// Connect and start health monitoring. No-op when already connected.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.executor().connect().await
    }

    /// Stop health monitoring and release the session. Safe to call repeatedly.
    ///
    /// In-flight operations are not aborted; they fail on their next attempt.
    pub async fn disconnect(&self) {
        let link = self.link();
        link.bump_disconnect_epoch();

        let session = self.executor().teardown().await;
        if let Some(monitor) = link.take_monitor() {
            monitor.stop().await;
        }

        if session.is_some() {
            link.retire(session).await;
            info!("[CONN] Disconnected from {} service", link.service().name());
        }
    }

    /// Run a remote operation with connection assurance and retries
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T, ConnectionError>
    where
        F: FnMut(Arc<S::Session>) -> Fut,
        Fut: Future<Output = Result<T, ConnectionError>>,
    {
        self.executor().execute(name, op).await
    }

    /// Probe the current session now.
    ///
    /// Reconnection stays with the background monitor; this only reports.
    pub async fn health_check(&self) -> Result<(), ConnectionError> {
        let link = self.link();
        let state = link.state().await;
        let session = match (state, link.session().await) {
            (ConnectionState::Connected, Some(session)) => session,
            _ => return Err(ConnectionError::Unavailable(state)),
        };

        let limit = self.executor().config().keep_alive_interval;
        match probe_session(link, &session, limit).await {
            Ok(()) => {
                link.record_health_check();
                Ok(())
            }
            Err(e) => {
                warn!("[CONN] Health check failed: {}", e);
                link.record_error(&e).await;
                Err(e)
            }
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.link().state().await
    }

    pub async fn status(&self) -> ConnectionStatus {
        let link = self.link();
        ConnectionStatus {
            state: link.state().await,
            last_error: link.last_error().await,
            stats: link.stats().snapshot(),
            last_health_check: link.last_health_check_ms(),
            last_transition: link.last_transition_ms().await,
        }
    }

    /// Receive connection events; each subscriber gets its own stream
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.link().subscribe()
    }

    pub fn reset_stats(&self) {
        self.link().stats().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockService;
    use livelink_shared::{BackoffPolicy, RemoteError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::{sleep, Instant};

    fn connection_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(1),
            keep_alive_interval: Duration::from_millis(500),
            auto_reconnect: true,
            max_reconnect_attempts: 3,
            reconnect_base_delay: Duration::from_millis(10),
            health_check_interval: Duration::from_millis(100),
        }
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: false,
            policy: BackoffPolicy::Fixed,
        }
    }

    fn manager(svc: &MockService) -> ConnectionManager<MockService> {
        ConnectionManager::new(svc.clone(), retry_config(), connection_config()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = ConnectionManager::new(
            MockService::new(),
            retry_config(),
            ConnectionConfig {
                health_check_interval: Duration::ZERO,
                ..connection_config()
            },
        );
        assert_eq!(result.err(), Some(ConfigError::ZeroHealthCheckInterval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_disconnected_and_idle() {
        let svc = MockService::new();
        let mgr = manager(&svc);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
        assert_eq!(svc.opens(), 0);
        assert_eq!(svc.probes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connect_opens_once() {
        let svc = MockService::new();
        svc.set_open_delay(Duration::from_millis(20));
        let mgr = manager(&svc);
        let other = mgr.clone();

        let (a, b) = tokio::join!(mgr.connect(), other.connect());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(svc.opens(), 1);

        // Already connected: no-op
        mgr.connect().await.unwrap();
        assert_eq!(svc.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_monitoring() {
        let svc = MockService::new();
        let mgr = manager(&svc);
        mgr.connect().await.unwrap();
        sleep(Duration::from_millis(250)).await;
        assert!(svc.probes() >= 2);

        mgr.disconnect().await;
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
        assert_eq!(svc.closes(), 1);

        let (probes, opens) = (svc.probes(), svc.opens());
        sleep(Duration::from_millis(2 * 100)).await;
        assert_eq!(svc.probes(), probes);
        assert_eq!(svc.opens(), opens);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_reconnect() {
        let svc = MockService::new();
        svc.script_opens([Ok(())]);
        svc.fail_opens_with(ConnectionError::Transient("refused".into()));
        svc.script_probes([Err(ConnectionError::Transient("reset".into()))]);
        let mgr = manager(&svc);
        mgr.connect().await.unwrap();

        // Probe fails at 100ms, first reconnect attempt at 110ms
        sleep(Duration::from_millis(115)).await;
        assert_eq!(mgr.state().await, ConnectionState::Reconnecting);

        mgr.disconnect().await;
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);

        let opens = svc.opens();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(svc.opens(), opens);
        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let svc = MockService::new();
        let mgr = manager(&svc);

        mgr.disconnect().await;
        mgr.connect().await.unwrap();
        mgr.disconnect().await;
        mgr.disconnect().await;

        assert_eq!(mgr.state().await, ConnectionState::Disconnected);
        assert_eq!(svc.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_execute_fails_fast_after_disconnect() {
        let svc = MockService::new();
        let mgr = manager(&svc);
        mgr.connect().await.unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let worker = mgr.clone();
        let counter = calls.clone();
        let task = tokio::spawn(async move {
            worker
                .execute("update_room", move |_session| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(RemoteError::new(503, "busy").into()) }
                })
                .await
        });

        // First attempt has failed and the executor is sleeping its 1s backoff
        sleep(Duration::from_millis(50)).await;
        let before = Instant::now();
        mgr.disconnect().await;

        let result = task.await.unwrap();
        assert_eq!(
            result.unwrap_err(),
            ConnectionError::Unavailable(ConnectionState::Disconnected)
        );
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.opens(), 1, "must not reconnect silently");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_connects_lazily() {
        let svc = MockService::new();
        let mgr = manager(&svc);

        let id = mgr
            .execute("whoami", |session| async move { Ok(session.id) })
            .await
            .unwrap();

        assert_eq!(id, 1);
        assert_eq!(mgr.state().await, ConnectionState::Connected);

        // Monitoring started with the lazy connect
        sleep(Duration::from_millis(150)).await;
        assert!(svc.probes() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_lazy_executes_shares_one_open() {
        let svc = MockService::new();
        svc.set_open_delay(Duration::from_millis(20));
        let mgr = manager(&svc);

        let calls = (0..8).map(|_| mgr.execute("whoami", |session| async move { Ok(session.id) }));
        let ids: Vec<u64> = futures::future::join_all(calls)
            .await
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(ids.iter().all(|id| *id == 1));
        assert_eq!(svc.opens(), 1);
        assert_eq!(mgr.status().await.stats.connection_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_manager_reconnects_on_explicit_connect() {
        let svc = MockService::new();
        svc.script_opens([Err(ConnectionError::Transient("refused".into()))]);
        let mgr = manager(&svc);

        assert!(mgr.connect().await.is_err());
        assert_eq!(mgr.state().await, ConnectionState::Failed);

        mgr.connect().await.unwrap();
        assert_eq!(mgr.state().await, ConnectionState::Connected);
        assert_eq!(svc.opens(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_connect_recovers_after_reconnect_gives_up() {
        let svc = MockService::new();
        svc.script_opens([
            Ok(()),
            Err(ConnectionError::Transient("refused".into())),
            Err(ConnectionError::Transient("refused".into())),
            Err(ConnectionError::Transient("refused".into())),
        ]);
        svc.script_probes([Err(ConnectionError::Transient("reset".into()))]);
        let mgr = manager(&svc);
        let mut events = mgr.subscribe();
        mgr.connect().await.unwrap();

        // Probe fails at 100ms; attempts at 110, 130 and 160ms all fail
        sleep(Duration::from_millis(200)).await;
        assert_eq!(mgr.state().await, ConnectionState::Failed);
        let mut gave_up = false;
        while let Ok(event) = events.try_recv() {
            gave_up |= matches!(event, ConnectionEvent::ReconnectFailed { attempts: 3, .. });
        }
        assert!(gave_up);

        assert_eq!(
            mgr.execute("noop", |_s| async { Ok(()) }).await,
            Err(ConnectionError::Unavailable(ConnectionState::Failed))
        );

        mgr.connect().await.unwrap();
        mgr.execute("noop", |_s| async { Ok(()) }).await.unwrap();
        assert_eq!(mgr.state().await, ConnectionState::Connected);
        assert_eq!(svc.opens(), 5);

        // Monitoring resumed with the new session
        let probes = svc.probes();
        sleep(Duration::from_millis(150)).await;
        assert!(svc.probes() > probes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_on_demand() {
        let svc = MockService::new();
        let mgr = manager(&svc);

        assert_eq!(
            mgr.health_check().await,
            Err(ConnectionError::Unavailable(ConnectionState::Disconnected))
        );

        mgr.connect().await.unwrap();
        mgr.health_check().await.unwrap();
        assert!(mgr.status().await.last_health_check.is_some());

        svc.script_probes([Err(ConnectionError::Transient("reset".into()))]);
        assert!(mgr.health_check().await.is_err());
        assert_eq!(mgr.state().await, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot_and_reset() {
        let svc = MockService::new();
        let mgr = manager(&svc);

        mgr.execute("noop", |_s| async { Ok(()) }).await.unwrap();
        let _ = mgr
            .execute("bad_args", |_s| async {
                Err::<(), _>(RemoteError::new(400, "invalid room name").into())
            })
            .await;

        let status = mgr.status().await;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.stats.total_requests, 2);
        assert_eq!(status.stats.successful_requests, 1);
        assert_eq!(status.stats.failed_requests, 3);
        assert_eq!(status.stats.connection_attempts, 1);
        assert_eq!(
            status.stats.last_error.as_deref(),
            Some("Remote error 400: invalid room name")
        );

        mgr.reset_stats();
        assert_eq!(mgr.status().await.stats, StatsSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_state_changes() {
        let svc = MockService::new();
        let mgr = manager(&svc);
        let mut events = mgr.subscribe();

        mgr.connect().await.unwrap();
        mgr.disconnect().await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                ConnectionEvent::StateChanged {
                    from: ConnectionState::Disconnected,
                    to: ConnectionState::Connecting,
                },
                ConnectionEvent::StateChanged {
                    from: ConnectionState::Connecting,
                    to: ConnectionState::Connected,
                },
                ConnectionEvent::StateChanged {
                    from: ConnectionState::Connected,
                    to: ConnectionState::Disconnected,
                },
            ]
        );
    }
}
