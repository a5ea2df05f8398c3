//! Fan-out gateway process.
//!
//! Bridges upstream pub/sub channels to WebSocket clients under ACL,
//! subscription and rate guardrails. Reads the shared virtual clock
//! from Redis so replayed timestamps match the orchestrator's.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{Level, info, warn};
use tracing_subscriber::prelude::*;
use tradecouncil::application::clock::SharedClock;
use tradecouncil::application::gateway::GatewayCore;
use tradecouncil::config::GatewayEnvConfig;
use tradecouncil::domain::ports::{KeyValueStore, PubSub};
use tradecouncil::infrastructure::gateway_ws;
use tradecouncil::infrastructure::memory::InMemoryPubSub;
use tradecouncil::infrastructure::redis::{RedisKeyValueStore, RedisPubSub};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Tradecouncil gateway {} starting...", env!("CARGO_PKG_VERSION"));

    let gateway_config = GatewayEnvConfig::from_env()?;
    let redis_url = std::env::var("REDIS_URL").ok();

    let (clock, pubsub): (Arc<SharedClock>, Arc<dyn PubSub>) = match &redis_url {
        Some(url) => {
            let kv: Arc<dyn KeyValueStore> = Arc::new(RedisKeyValueStore::connect(url).await?);
            let pubsub: Arc<dyn PubSub> = Arc::new(RedisPubSub::connect(url).await?);
            (Arc::new(SharedClock::with_store(kv)), pubsub)
        }
        None => {
            warn!("REDIS_URL not set; using process-local pub/sub (demo only)");
            (Arc::new(SharedClock::new()), Arc::new(InMemoryPubSub::new()))
        }
    };

    let core = Arc::new(GatewayCore::new(
        gateway_config.to_gateway_config(),
        pubsub,
        clock,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let receive_core = core.clone();
    let receive_shutdown = shutdown_rx.clone();
    let receive_loop = tokio::spawn(async move { receive_core.run(receive_shutdown).await });

    let bind_addr = gateway_config.bind_addr();
    let auth = gateway_config.to_auth();
    let server_core = core.clone();
    let server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = gateway_ws::serve(server_core, &bind_addr, auth, server_shutdown).await {
            warn!("Gateway listener failed: {:#}", e);
        }
    });

    info!("Gateway running. Press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), server).await;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), receive_loop).await;

    let stats = core.stats().await;
    info!(
        "Gateway stopped ({} clients at shutdown)",
        stats.clients_connected
    );
    Ok(())
}
