//! Queue module for RabbitMQ operations.
//!
//! This module provides:
//! - The envelope and delivery types carried on the tenant queues
//! - [`MessageSource`], the pull/settle abstraction the consumer runs against
//! - An AMQP-backed source and an in-memory source
//! - Async publisher used by the receiver
//!
//! ## Architecture
//!
//! ```text
//! Receiver → hooks_{tenant} queue → Distributor → downstream endpoints
//! ```

pub mod amqp;
pub mod memory;
pub mod publisher;
pub mod types;

use std::future::Future;

use thiserror::Error;

pub use amqp::AmqpSource;
pub use memory::{memory_queue, MemoryQueue, MemoryQueueHandle};
pub use publisher::{EnvelopePublisher, Publisher};
pub use types::{
    tenant_queue, DeliveryHandle, HeaderList, QueueMessage, WebhookEnvelope, TENANT_QUEUE_PREFIX,
};

/// Errors raised by a queue transport.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("amqp transport error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("queue is closed")]
    Closed,
}

/// A queue the consumer pulls deliveries from and acknowledges them on.
///
/// Each delivery returned by [`receive`](MessageSource::receive) is settled
/// exactly once, with [`ack`](MessageSource::ack) or
/// [`nack`](MessageSource::nack). The distributor only ever acknowledges; a
/// delivery left unsettled is redelivered by the transport.
pub trait MessageSource: Send {
    /// Wait for the next delivery. `None` means the subscription ended.
    fn receive(&mut self) -> impl Future<Output = Option<Result<QueueMessage, QueueError>>> + Send;

    /// Acknowledge a delivery, removing it from the queue.
    fn ack(&self, handle: DeliveryHandle) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Reject a delivery, optionally returning it to the queue.
    fn nack(
        &self,
        handle: DeliveryHandle,
        requeue: bool,
    ) -> impl Future<Output = Result<(), QueueError>> + Send;
}
