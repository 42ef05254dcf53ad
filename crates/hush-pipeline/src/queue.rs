//! The alert queue seam.
//!
//! Workers pull [`Delivery`] values from an [`AlertQueue`] and settle each
//! one exactly once: `ack` after processing, `requeue` for another attempt,
//! or `reject` to drop it for good. [`MemoryQueue`] is an in-process queue
//! with redelivery, used by `hushd` and by tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// One message handed to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue-assigned message id.
    pub id: u64,
    /// Raw message body.
    pub payload: Vec<u8>,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
}

/// A message queue with explicit settlement.
pub trait AlertQueue: Send + Sync + 'static {
    /// Waits for the next message. Returns `None` once the queue is closed
    /// and drained.
    fn receive(&self) -> impl std::future::Future<Output = Result<Option<Delivery>>> + Send;

    /// Acknowledges a processed message.
    fn ack(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Returns a message for redelivery.
    fn requeue(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Drops a message without redelivery.
    fn reject(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send;
}

impl<Q: AlertQueue> AlertQueue for Arc<Q> {
    fn receive(&self) -> impl std::future::Future<Output = Result<Option<Delivery>>> + Send {
        (**self).receive()
    }

    fn ack(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send {
        (**self).ack(delivery)
    }

    fn requeue(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send {
        (**self).requeue(delivery)
    }

    fn reject(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send {
        (**self).reject(delivery)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Delivery>,
    in_flight: HashMap<u64, Delivery>,
    next_id: u64,
    closed: bool,
    acked: usize,
    requeued: usize,
    rejected: Vec<Delivery>,
}

/// In-process queue with at-least-once redelivery.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    changed: Notify,
}

/// Counters describing a [`MemoryQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Messages waiting for a worker.
    pub ready: usize,
    /// Messages handed out and not yet settled.
    pub in_flight: usize,
    /// Acknowledged messages.
    pub acked: usize,
    /// Requeue operations.
    pub requeued: usize,
    /// Rejected messages.
    pub rejected: usize,
}

impl MemoryQueue {
    /// Creates an empty, open queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message and returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Queue`] if the queue is closed.
    pub fn push(&self, payload: impl Into<Vec<u8>>) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PipelineError::Queue {
                reason: "queue is closed".to_string(),
            });
        }
        state.next_id += 1;
        let id = state.next_id;
        state.ready.push_back(Delivery {
            id,
            payload: payload.into(),
            attempt: 1,
        });
        drop(state);
        self.changed.notify_waiters();
        Ok(id)
    }

    /// Stops accepting new messages. Receivers drain what is left,
    /// including redeliveries, then see `None`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_waiters();
    }

    /// Returns the current counters.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            ready: state.ready.len(),
            in_flight: state.in_flight.len(),
            acked: state.acked,
            requeued: state.requeued,
            rejected: state.rejected.len(),
        }
    }

    /// Returns the rejected messages.
    #[must_use]
    pub fn rejected(&self) -> Vec<Delivery> {
        self.state.lock().rejected.clone()
    }

    fn settle(&self, delivery: &Delivery) -> Result<Delivery> {
        self.state
            .lock()
            .in_flight
            .remove(&delivery.id)
            .ok_or_else(|| PipelineError::Queue {
                reason: format!("message {} is not in flight", delivery.id),
            })
    }

    fn try_receive(&self) -> Option<Option<Delivery>> {
        let mut state = self.state.lock();
        if let Some(delivery) = state.ready.pop_front() {
            state.in_flight.insert(delivery.id, delivery.clone());
            return Some(Some(delivery));
        }
        if state.closed && state.in_flight.is_empty() {
            return Some(None);
        }
        None
    }
}

impl AlertQueue for MemoryQueue {
    fn receive(&self) -> impl std::future::Future<Output = Result<Option<Delivery>>> + Send {
        async move {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(next) = self.try_receive() {
                    return Ok(next);
                }
                notified.await;
            }
        }
    }

    fn ack(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send {
        let result = self.settle(delivery).map(|_| {
            self.state.lock().acked += 1;
            self.changed.notify_waiters();
        });
        async move { result }
    }

    fn requeue(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send {
        let result = self.settle(delivery).map(|mut redelivery| {
            redelivery.attempt += 1;
            debug!(message_id = redelivery.id, attempt = redelivery.attempt, "message requeued");
            let mut state = self.state.lock();
            state.requeued += 1;
            state.ready.push_back(redelivery);
            drop(state);
            self.changed.notify_waiters();
        });
        async move { result }
    }

    fn reject(&self, delivery: &Delivery) -> impl std::future::Future<Output = Result<()>> + Send {
        let result = self.settle(delivery).map(|rejected| {
            self.state.lock().rejected.push(rejected);
            self.changed.notify_waiters();
        });
        async move { result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_in_order_and_acks() {
        let queue = MemoryQueue::new();
        queue.push("a").unwrap();
        queue.push("b").unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        assert_eq!(first.payload, b"a");
        assert_eq!(first.attempt, 1);
        queue.ack(&first).await.unwrap();

        let second = queue.receive().await.unwrap().unwrap();
        assert_eq!(second.payload, b"b");
        assert_eq!(queue.stats().in_flight, 1);
        queue.ack(&second).await.unwrap();
        assert_eq!(queue.stats().acked, 2);
    }

    #[tokio::test]
    async fn requeue_redelivers_with_next_attempt() {
        let queue = MemoryQueue::new();
        queue.push("a").unwrap();
        let delivery = queue.receive().await.unwrap().unwrap();
        queue.requeue(&delivery).await.unwrap();

        let again = queue.receive().await.unwrap().unwrap();
        assert_eq!(again.id, delivery.id);
        assert_eq!(again.attempt, 2);
        assert_eq!(queue.stats().requeued, 1);
    }

    #[tokio::test]
    async fn reject_drops_for_good() {
        let queue = MemoryQueue::new();
        queue.push("bad").unwrap();
        queue.close();
        let delivery = queue.receive().await.unwrap().unwrap();
        queue.reject(&delivery).await.unwrap();
        assert_eq!(queue.rejected(), vec![delivery]);
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn settling_twice_fails() {
        let queue = MemoryQueue::new();
        queue.push("a").unwrap();
        let delivery = queue.receive().await.unwrap().unwrap();
        queue.ack(&delivery).await.unwrap();
        assert!(queue.ack(&delivery).await.is_err());
        assert!(queue.requeue(&delivery).await.is_err());
    }

    #[tokio::test]
    async fn closed_queue_refuses_pushes() {
        let queue = MemoryQueue::new();
        queue.close();
        assert!(matches!(queue.push("a"), Err(PipelineError::Queue { .. })));
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn receive_waits_for_push() {
        let queue = Arc::new(MemoryQueue::new());
        let receiver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("late").unwrap();
        let delivery = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn closed_queue_waits_for_in_flight_redelivery() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push("a").unwrap();
        queue.close();
        let delivery = queue.receive().await.unwrap().unwrap();

        let receiver = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.requeue(&delivery).await.unwrap();

        let again = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(again.attempt, 2);
        queue.ack(&again).await.unwrap();
        assert!(queue.receive().await.unwrap().is_none());
    }
}
