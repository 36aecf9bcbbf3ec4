//! RabbitMQ message source using lapin.
//!
//! Consumes one durable queue with a prefetch of 1 and manual acknowledgement,
//! so at most one unacknowledged delivery is ever held by this consumer.

use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, Consumer,
};
use tracing::{error, info, warn};

use super::{DeliveryHandle, MessageSource, QueueError, QueueMessage};

/// Consumer tag announced to the broker.
const CONSUMER_TAG: &str = "relay-distributor";

/// Deliveries held unacknowledged at once.
const PREFETCH_COUNT: u16 = 1;

/// A [`MessageSource`] reading from a RabbitMQ queue.
pub struct AmqpSource {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    queue: String,
}

impl AmqpSource {
    /// Connect, declare `queue` and start consuming it.
    ///
    /// Connection-level faults reported asynchronously by the client are
    /// logged; they do not end the subscription on their own.
    pub async fn connect(url: &str, queue: &str) -> Result<Self, QueueError> {
        info!(url_length = url.len(), queue = %queue, "rabbitmq_connecting");

        let connection = Connection::connect(url, ConnectionProperties::default()).await?;

        connection.on_error(|e| {
            error!(error = %e, "rabbitmq_connection_fault");
        });

        info!("rabbitmq_connected");

        let channel = connection.create_channel().await?;

        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

        info!(prefetch_count = PREFETCH_COUNT, "rabbitmq_qos_set");

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(queue = %queue, "rabbitmq_queue_declared");

        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %queue, "rabbitmq_consumer_started");

        Ok(Self {
            connection,
            channel,
            consumer,
            queue: queue.to_string(),
        })
    }

    /// Name of the consumed queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Close the channel and connection.
    pub async fn close(&self) {
        if let Err(e) = self.channel.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_channel_close_error");
        }

        if let Err(e) = self.connection.close(200, "Normal shutdown").await {
            warn!(error = %e, "rabbitmq_connection_close_error");
        }

        info!(queue = %self.queue, "rabbitmq_source_closed");
    }
}

impl MessageSource for AmqpSource {
    async fn receive(&mut self) -> Option<Result<QueueMessage, QueueError>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(e.into())),
        };

        let message_id = delivery
            .properties
            .message_id()
            .as_ref()
            .map(|s| s.to_string());

        Some(Ok(QueueMessage {
            sequence: delivery.delivery_tag,
            message_id,
            body: delivery.data,
            handle: DeliveryHandle(delivery.delivery_tag),
        }))
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
        self.channel
            .basic_ack(handle.0, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), QueueError> {
        self.channel
            .basic_nack(
                handle.0,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }
}
