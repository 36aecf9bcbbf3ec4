//! In-memory message source.
//!
//! A bounded channel stands in for the broker; every acknowledgement and
//! rejection is recorded so callers can inspect how each delivery was settled.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};

use tokio::sync::mpsc;

use super::{DeliveryHandle, MessageSource, QueueError, QueueMessage};

#[derive(Debug, Default)]
struct Settled {
    acked: Vec<DeliveryHandle>,
    rejected: Vec<(DeliveryHandle, bool)>,
}

type SettledLog = Arc<Mutex<Settled>>;

/// Consumer side of an in-memory queue.
pub struct MemoryQueue {
    rx: mpsc::Receiver<QueueMessage>,
    settled: SettledLog,
}

/// Producer side of an in-memory queue. Dropping every handle closes the queue.
#[derive(Clone)]
pub struct MemoryQueueHandle {
    tx: mpsc::Sender<QueueMessage>,
    next_sequence: Arc<AtomicU64>,
    settled: SettledLog,
}

/// Create a bounded in-memory queue holding at most `capacity` deliveries.
pub fn memory_queue(capacity: usize) -> (MemoryQueueHandle, MemoryQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let settled = SettledLog::default();

    (
        MemoryQueueHandle {
            tx,
            next_sequence: Arc::new(AtomicU64::new(1)),
            settled: settled.clone(),
        },
        MemoryQueue { rx, settled },
    )
}

impl MemoryQueueHandle {
    /// Enqueue a raw body, waiting for capacity. Returns its delivery handle.
    pub async fn push(&self, body: impl Into<Vec<u8>>) -> Result<DeliveryHandle, QueueError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let handle = DeliveryHandle(sequence);

        self.tx
            .send(QueueMessage {
                sequence,
                message_id: None,
                body: body.into(),
                handle,
            })
            .await
            .map_err(|_| QueueError::Closed)?;

        Ok(handle)
    }

    /// Every acknowledged delivery so far, in order.
    pub fn acknowledged(&self) -> Vec<DeliveryHandle> {
        lock(&self.settled).acked.clone()
    }
}

impl MemoryQueue {
    /// Every acknowledged delivery so far, in order.
    pub fn acknowledged(&self) -> Vec<DeliveryHandle> {
        lock(&self.settled).acked.clone()
    }

    /// Every rejected delivery so far with its requeue flag, in order.
    pub fn rejected(&self) -> Vec<(DeliveryHandle, bool)> {
        lock(&self.settled).rejected.clone()
    }
}

fn lock(log: &SettledLog) -> MutexGuard<'_, Settled> {
    log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MessageSource for MemoryQueue {
    async fn receive(&mut self) -> Option<Result<QueueMessage, QueueError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
        lock(&self.settled).acked.push(handle);
        Ok(())
    }

    async fn nack(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), QueueError> {
        lock(&self.settled).rejected.push((handle, requeue));
        Ok(())
    }
}
