//! Queue consumer.
//!
//! Pulls one delivery at a time from a [`MessageSource`], runs it through the
//! [`MessageProcessor`] and acknowledges it once processing has fully
//! finished. Messages are handled strictly one after another, in arrival
//! order.
//!
//! Every received delivery is acknowledged exactly once, whatever its route
//! outcomes, including deliveries that fail to decode or capture and
//! deliveries whose dispatch was cut short by shutdown.

use tracing::{error, info, info_span, warn, Instrument};

use crate::processor::MessageProcessor;
use crate::queue::{MessageSource, QueueMessage};
use crate::shutdown::Cancellation;

/// Counters for one consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acknowledged: u64,
    /// Messages that failed before dispatch (decode or capture)
    pub failed: u64,
}

/// Why the consumer loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown signal fired
    Shutdown,
    /// The source ended its subscription without a shutdown
    SourceClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerRun {
    pub stop: StopReason,
    pub stats: ConsumerStats,
}

/// Consume `source` until it closes or `shutdown` fires.
pub async fn run<S: MessageSource>(
    source: &mut S,
    processor: &MessageProcessor,
    shutdown: &Cancellation,
) -> ConsumerRun {
    let mut stats = ConsumerStats::default();

    info!("consumer_ready");

    let stop = loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("consumer_stopping");
                break StopReason::Shutdown;
            }
            next = source.receive() => next,
        };

        match next {
            Some(Ok(message)) => {
                stats.received += 1;
                handle_message(source, processor, message, shutdown, &mut stats).await;
            }
            Some(Err(e)) => {
                error!(error = %e, "queue_delivery_error");
            }
            None => {
                error!("queue_consumer_closed");
                break StopReason::SourceClosed;
            }
        }
    };

    info!(
        received = stats.received,
        acknowledged = stats.acknowledged,
        failed = stats.failed,
        stop = ?stop,
        "consumer_stopped"
    );

    ConsumerRun { stop, stats }
}

async fn handle_message<S: MessageSource>(
    source: &S,
    processor: &MessageProcessor,
    message: QueueMessage,
    shutdown: &Cancellation,
    stats: &mut ConsumerStats,
) {
    let span = info_span!(
        "message",
        sequence = message.sequence,
        message_id = message.message_id.as_deref().unwrap_or("unknown")
    );

    async {
        info!(
            sequence = message.sequence,
            body_length = message.body.len(),
            "message_received"
        );

        match processor.process(&message, shutdown).await {
            Ok(report) => {
                if report.dispatch.was_cancelled() {
                    warn!(sequence = message.sequence, "message_dispatch_cancelled");
                }
                info!(
                    sequence = message.sequence,
                    matched_routes = report.matched,
                    delivered = report.dispatch.delivered(),
                    failed = report.dispatch.failed(),
                    "message_processed"
                );
            }
            Err(e) => {
                stats.failed += 1;
                error!(
                    sequence = message.sequence,
                    error = %e,
                    body_preview = %String::from_utf8_lossy(
                        &message.body[..message.body.len().min(500)]
                    ),
                    "message_processing_failed"
                );
            }
        }

        match source.ack(message.handle).await {
            Ok(()) => {
                stats.acknowledged += 1;
                info!(sequence = message.sequence, "message_completed");
            }
            Err(e) => error!(sequence = message.sequence, error = %e, "queue_ack_failed"),
        }
    }
    .instrument(span)
    .await
}
