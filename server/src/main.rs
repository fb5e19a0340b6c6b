//! Request/reply bridge server.
//!
//! Accepts HTTP requests, publishes each one to Redpanda with a fresh
//! correlation id and answers with the first matching reply.
//!
//! Run with: cargo run --bin reqbridge
//! Health: http://localhost:3333/health
//! Metrics: http://localhost:9090/metrics (when `BRIDGE_METRICS_ADDR` is set)

mod config;

use config::ServerConfig;
use reqbridge_core::BrokerGateway;
use reqbridge_redpanda::RedpandaGateway;
use reqbridge_runtime::metrics::MetricsServer;
use reqbridge_runtime::{RequestBridge, RetryPolicy, RetryingGateway};
use reqbridge_web::{AppState, router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = ServerConfig::from_env()?;
    info!(
        brokers = %config.brokers,
        listen = %config.listen_addr,
        timeout_ms = config.timeout.as_millis(),
        reply_addressing = ?config.reply_addressing,
        "Starting request bridge"
    );

    if let Some(addr) = config.metrics_addr {
        MetricsServer::new(addr).start()?;
        info!(%addr, "Metrics endpoint listening");
    }

    let redpanda = RedpandaGateway::builder()
        .brokers(&config.brokers)
        .producer_acks(&config.producer_acks)
        .reply_addressing(config.reply_addressing.clone())
        .build()?;

    let gateway: Arc<dyn BrokerGateway> = if config.publish_retries > 0 {
        let policy = RetryPolicy::builder()
            .max_retries(config.publish_retries)
            .build();
        Arc::new(RetryingGateway::new(redpanda, policy))
    } else {
        Arc::new(redpanda)
    };

    let bridge = RequestBridge::builder(gateway)
        .timeout(config.timeout)
        .id_bytes(config.id_bytes)
        .topic_prefix(config.topic_prefix.clone())
        .build()?;
    let bridge = Arc::new(bridge);

    let app = router(AppState::new(Arc::clone(&bridge)));
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let in_flight = bridge.in_flight();
    if in_flight > 0 {
        warn!(in_flight, "Shut down with calls still in flight");
    }
    info!("Request bridge stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,reqbridge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                warn!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
