//! Async RabbitMQ publisher for enqueueing webhook envelopes.
//!
//! This module provides a connection-pooled publisher that can be shared
//! across multiple async tasks. Tenant queues are declared lazily the first
//! time something is published to them.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use super::types::WebhookEnvelope;

/// Anything the receiver can hand an envelope to.
pub trait EnvelopePublisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        queue: &'a str,
        envelope: &'a WebhookEnvelope,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Async RabbitMQ publisher with connection management.
///
/// The publisher maintains a persistent connection and channel to RabbitMQ,
/// automatically reconnecting on failure.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    /// Queues declared on the current channel
    declared: Mutex<HashSet<String>>,
}

impl Publisher {
    /// Create a new publisher with the given RabbitMQ URL.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
                declared: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_publisher_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
            .await
            .context("Failed to connect to RabbitMQ")?;

        info!("rabbitmq_publisher_connected");

        let ch = conn
            .create_channel()
            .await
            .context("Failed to create channel")?;

        // Declarations belong to the old channel
        self.inner.declared.lock().await.clear();

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Declare `queue` as durable unless already done on this channel.
    async fn ensure_declared(&self, channel: &Channel, queue: &str) -> Result<()> {
        let mut declared = self.inner.declared.lock().await;
        if declared.contains(queue) {
            return Ok(());
        }

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue {}", queue))?;

        info!(queue = %queue, "rabbitmq_queue_declared");
        declared.insert(queue.to_string());
        Ok(())
    }

    /// Publish one envelope to `queue` as a persistent JSON message.
    pub async fn publish_envelope(&self, queue: &str, envelope: &WebhookEnvelope) -> Result<()> {
        let channel = self.ensure_connected().await?;
        self.ensure_declared(&channel, queue).await?;

        let body = serde_json::to_vec(envelope).context("Failed to serialize envelope")?;

        let message_id = format!(
            "{}-{}",
            envelope.kind.to_lowercase(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(message_id.clone().into()),
            )
            .await
            .context("Failed to publish envelope")?
            .await
            .context("Failed to confirm publish")?;

        info!(
            queue = %queue,
            message_id = %message_id,
            body_length = body.len(),
            "rabbitmq_envelope_published"
        );

        Ok(())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}

impl EnvelopePublisher for Publisher {
    fn publish<'a>(
        &'a self,
        queue: &'a str,
        envelope: &'a WebhookEnvelope,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.publish_envelope(queue, envelope))
    }
}
