use bytes::Bytes;
use futures::future::join_all;
use livelink::remote::TcpRemoteService;
use livelink::{logging, ConnectionEvent, ConnectionManager, ConnectionState, Settings};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Concurrent echo calls issued per tick
const ECHOES_PER_TICK: usize = 3;
const TICK: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let settings = Settings::load()?;
    info!("LiveLink demo starting");
    info!("  service: {}", settings.service.address);
    info!(
        "  health check every {}ms, retry up to {} attempts",
        settings.connection.health_check_interval.as_millis(),
        settings.retry.max_attempts
    );

    let service = TcpRemoteService::new(settings.service.clone());
    let manager = ConnectionManager::new(service, settings.retry, settings.connection)?;

    // Spawn event logger
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::StateChanged { from, to }) => {
                    debug!("[MAIN] state {} -> {}", from, to);
                }
                Ok(ConnectionEvent::HealthCheckFailed { error }) => {
                    warn!("[MAIN] Health check failed: {}", error);
                }
                Ok(ConnectionEvent::Reconnected { attempts }) => {
                    info!("[MAIN] Reconnected after {} attempt(s)", attempts);
                }
                Ok(ConnectionEvent::ReconnectFailed { attempts, error }) => {
                    error!(
                        "[MAIN] Gave up reconnecting after {} attempt(s): {:?}",
                        attempts, error
                    );
                }
                Err(RecvError::Lagged(n)) => warn!("[MAIN] Missed {} connection events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = manager.connect().await {
        // Not fatal: the loop below retries the connect each tick
        error!("[MAIN] Initial connect failed: {}", e);
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(TICK);
    let mut seq = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("[MAIN] Shutting down");
                break;
            }
        }

        // A failed manager waits for an explicit connect (initial failure or
        // after the monitor gave up reconnecting)
        if manager.state().await == ConnectionState::Failed {
            if let Err(e) = manager.connect().await {
                warn!("[MAIN] Reconnect failed, retrying next tick: {}", e);
                continue;
            }
            info!("[MAIN] Connection restored");
        }

        let calls = (0..ECHOES_PER_TICK).map(|_| {
            seq += 1;
            let payload = Bytes::from(format!("ping #{seq}"));
            let manager = manager.clone();
            async move {
                manager
                    .execute("echo", move |session| {
                        let payload = payload.clone();
                        async move { session.call("echo", payload).await }
                    })
                    .await
            }
        });

        for result in join_all(calls).await {
            match result {
                Ok(body) => debug!("[MAIN] echo: {}", String::from_utf8_lossy(&body)),
                Err(e) => warn!("[MAIN] echo failed: {}", e),
            }
        }

        let status = manager.status().await;
        info!(
            state = %status.state,
            total = status.stats.total_requests,
            ok = status.stats.successful_requests,
            failed = status.stats.failed_requests,
            retries = status.stats.retry_attempts,
            reconnects = status.stats.reconnect_attempts,
            "[MAIN] Status"
        );
    }

    manager.disconnect().await;
    Ok(())
}
