//! LiveLink remote-service simulator
//!
//! Environment:
//! - `LIVELINK_SERVER_ADDR`: listen address (default `0.0.0.0:7880`)
//! - `LIVELINK_TOKEN`: accepted access token (default `devkey`)
//! - `LIVELINK_DROP_PING_EVERY`: hang up instead of answering every Nth ping

mod session;

use anyhow::Context;
use session::{ClientSession, Simulator};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let addr = env_or("LIVELINK_SERVER_ADDR", "0.0.0.0:7880");
    let drop_ping_every = env_or("LIVELINK_DROP_PING_EVERY", "0")
        .parse::<u64>()
        .context("LIVELINK_DROP_PING_EVERY must be a non-negative integer")?;
    let sim = Arc::new(Simulator::new(env_or("LIVELINK_TOKEN", "devkey"), drop_ping_every));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Simulator listening on {}", addr);
    if drop_ping_every > 0 {
        info!("  dropping every {} ping(s)", drop_ping_every);
    }

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("Connection from: {}", peer);
        let _ = stream.set_nodelay(true);

        let sim = sim.clone();
        tokio::spawn(ClientSession::new(stream, peer).run(sim));
    }
}
