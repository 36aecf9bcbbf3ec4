//! WebhookRelay Receiver - thin webhook ingestion edge.
//!
//! This binary provides a small web server that:
//! - Receives GitHub, Slack and generic webhooks
//! - Checks the tenant against the allow-list
//! - Immediately enqueues the raw payload onto `hooks_{tenant}`
//!
//! All routing and delivery happens in the distributor.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::{shutdown, web, AppState, Publisher, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("receiver_starting");

    let settings = Settings::from_env();
    info!(
        port = settings.port,
        tenant_count = settings.valid_tenants.len(),
        amqp_url_set = !settings.amqp_url.is_empty(),
        "settings_loaded"
    );

    let publisher = Publisher::new(settings.amqp_url.clone());
    info!("rabbitmq_publisher_created");

    let state = AppState::new(settings.valid_tenants.clone(), Arc::new(publisher.clone()));
    let app = web::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "receiver_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown::wait_for_signal().await;
            info!("receiver_shutting_down");
        })
        .await
        .context("Server error")?;

    publisher.close().await;

    info!("receiver_shutdown_complete");

    Ok(())
}
