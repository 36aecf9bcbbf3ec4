//! WebhookRelay Distributor - relays queued webhooks to configured routes.
//!
//! Consumes one tenant queue, one message at a time. Each webhook is posted to
//! every matching route from the config file, then the message is acknowledged.

use anyhow::{bail, Context, Result};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use relay::{
    config,
    consumer::{self, StopReason},
    AmqpSource, DebugCapture, Dispatcher, MessageProcessor, Settings, Shutdown,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("distributor_starting");

    let settings = Settings::from_env();
    let config = config::load(&settings.config_path).context("Failed to load config")?;

    info!(
        queue = %config.queue_name,
        route_count = config.routes.len(),
        debug_output = config.debug_output,
        debug_output_path = ?config.debug_output_path,
        "config_loaded"
    );

    for route in config.routes.iter() {
        info!(
            route = %route.name,
            hook_type = %route.kind,
            hook_subtype = route.subtype.as_deref().unwrap_or("*"),
            host = %route.host,
            auth_scheme = route.auth.as_ref().map(|a| a.scheme()).unwrap_or("none"),
            "route_loaded"
        );
    }

    let dispatcher = Dispatcher::new().context("Failed to create HTTP client")?;
    let processor = MessageProcessor::new(
        config.routes.clone(),
        DebugCapture::from_config(&config),
        dispatcher,
    );

    let mut source = AmqpSource::connect(&config.queue_connection_string, &config.queue_name)
        .await
        .context("Failed to start queue consumer")?;

    let shutdown = Shutdown::new();
    let token = shutdown.token();
    tokio::spawn(async move {
        relay::shutdown::wait_for_signal().await;
        shutdown.trigger();
    });

    info!(queue = %source.queue(), "distributor_ready");

    let outcome = consumer::run(&mut source, &processor, &token).await;

    source.close().await;

    if outcome.stop == StopReason::SourceClosed {
        error!(
            queue = %source.queue(),
            received = outcome.stats.received,
            acknowledged = outcome.stats.acknowledged,
            "distributor_subscription_lost"
        );
        bail!("Queue subscription on {} ended unexpectedly", source.queue());
    }

    info!(
        received = outcome.stats.received,
        acknowledged = outcome.stats.acknowledged,
        "distributor_shutdown_complete"
    );

    Ok(())
}
