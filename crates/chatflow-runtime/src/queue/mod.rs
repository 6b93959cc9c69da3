//! Bounded at-least-once delivery queue.
//!
//! Outbound [`Envelope`]s are serialized to JSON and held until a consumer
//! delivers them through the platform action.
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`DeliveryQueue::enqueue`] | waits for capacity, then queues |
//! | [`DeliveryQueue::try_enqueue`] | fails with [`QueueError::Full`] instead of waiting |
//! | [`DeliveryQueue::reserve`] | hands one ready delivery to a consumer |
//! | [`Reservation::ack`] | delivered; frees capacity |
//! | [`Reservation::nack`] | failed; re-queued after a delay |
//! | [`Reservation::reject`] | undeliverable; dropped and counted |
//! | [`Reservation::dead_letter`] | out of retries; parked for inspection |
//!
//! Capacity counts queued and reserved deliveries, so it also bounds how
//! many deliveries consumers hold at once. A [`Reservation`] dropped
//! without being settled goes back to the head of the queue.
//!
//! ```rust,ignore
//! let queue = DeliveryQueue::new(1000);
//! queue.enqueue(&envelope).await?;
//!
//! if let Some(reservation) = queue.reserve(Duration::from_millis(100)).await {
//!     let envelope = reservation.envelope()?;
//!     // deliver, then
//!     reservation.ack();
//! }
//! ```

mod consumer;
mod metrics;
mod spool;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatflow_framework::{DispatchError, DispatchResult, Envelope, Outbox};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, error, warn};

pub use consumer::{Settlement, process, spawn_consumers};
pub use metrics::{DeliveryMetrics, DeliverySnapshot};
pub use spool::Spool;

/// Dead letters kept by [`DeliveryQueue::new`].
pub const DEFAULT_DEAD_LETTERS: usize = 1000;

/// Errors raised by the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("delivery queue is full")]
    Full,

    #[error("delivery queue is closed")]
    Closed,

    #[error("serialization failed: {0}")]
    Serialize(String),

    #[error("spool error: {0}")]
    Spool(String),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// One queued envelope in its serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: u64,
    /// JSON-encoded [`Envelope`].
    pub body: String,
    /// Failed delivery attempts so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(skip)]
    not_before: Option<Instant>,
}

impl Delivery {
    pub fn new(id: u64, body: String) -> Self {
        Self {
            id,
            body,
            attempts: 0,
            not_before: None,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.not_before.is_none_or(|t| t <= now)
    }
}

#[derive(Default)]
struct State {
    ready: VecDeque<Delivery>,
    dead: VecDeque<Delivery>,
    in_flight: usize,
    next_id: u64,
}

struct Shared {
    state: Mutex<State>,
    space: Semaphore,
    /// Deliveries admitted beyond capacity by a spool restore.
    overdraft: AtomicUsize,
    items: Notify,
    closed: AtomicBool,
    capacity: usize,
    dead_capacity: usize,
    metrics: DeliveryMetrics,
}

impl Shared {
    fn push(&self, body: String) -> u64 {
        let id = {
            let mut state = self.state.lock();
            state.next_id += 1;
            let id = state.next_id;
            state.ready.push_back(Delivery::new(id, body));
            id
        };
        DeliveryMetrics::inc(&self.metrics.enqueued);
        self.items.notify_one();
        id
    }

    /// Returns one unit of capacity.
    fn release(&self) {
        let repaid = self
            .overdraft
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if !repaid {
            self.space.add_permits(1);
        }
    }
}

/// Handle to a shared delivery queue; clones share the same queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    shared: Arc<Shared>,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self::with_dead_letter_capacity(capacity, DEFAULT_DEAD_LETTERS)
    }

    /// Creates a queue that keeps at most `dead_capacity` dead letters.
    pub fn with_dead_letter_capacity(capacity: usize, dead_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                space: Semaphore::new(capacity),
                overdraft: AtomicUsize::new(0),
                items: Notify::new(),
                closed: AtomicBool::new(false),
                capacity,
                dead_capacity,
                metrics: DeliveryMetrics::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Deliveries waiting for a consumer.
    pub fn len(&self) -> usize {
        self.shared.state.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliveries reserved by consumers and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    pub fn dead_letters(&self) -> Vec<Delivery> {
        self.shared.state.lock().dead.iter().cloned().collect()
    }

    /// Removes and returns the parked dead letters, oldest first.
    pub fn take_dead_letters(&self) -> Vec<Delivery> {
        self.shared.state.lock().dead.drain(..).collect()
    }

    pub fn metrics(&self) -> &DeliveryMetrics {
        &self.shared.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Queues an envelope, waiting while the queue is full.
    pub async fn enqueue(&self, envelope: &Envelope) -> QueueResult<u64> {
        let body = encode(envelope)?;
        let permit = self
            .shared
            .space
            .acquire()
            .await
            .map_err(|_| QueueError::Closed)?;
        permit.forget();
        Ok(self.shared.push(body))
    }

    /// Queues an envelope or fails at once when the queue is full.
    pub fn try_enqueue(&self, envelope: &Envelope) -> QueueResult<u64> {
        let body = encode(envelope)?;
        match self.shared.space.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::NoPermits) => return Err(QueueError::Full),
            Err(TryAcquireError::Closed) => return Err(QueueError::Closed),
        }
        Ok(self.shared.push(body))
    }

    /// Re-admits spooled deliveries, ignoring capacity for the overflow.
    pub fn restore(&self, deliveries: Vec<Delivery>) -> usize {
        let count = deliveries.len();
        for delivery in deliveries {
            match self.shared.space.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => {
                    self.shared.overdraft.fetch_add(1, Ordering::AcqRel);
                }
            }
            let mut state = self.shared.state.lock();
            state.next_id = state.next_id.max(delivery.id);
            state.ready.push_back(Delivery {
                not_before: None,
                ..delivery
            });
        }
        if count > 0 {
            debug!(count, "Restored spooled deliveries");
            self.shared.items.notify_waiters();
        }
        count
    }

    /// Reserves the next due delivery, waiting up to `wait` for one.
    ///
    /// Returns `None` when nothing became due in time or the queue closed.
    pub async fn reserve(&self, wait: Duration) -> Option<Reservation> {
        if let Some(reservation) = self.try_reserve() {
            return Some(reservation);
        }
        if self.is_closed() {
            return None;
        }
        let _ = tokio::time::timeout(wait, self.shared.items.notified()).await;
        self.try_reserve()
    }

    /// Reserves the next due delivery without waiting.
    pub fn try_reserve(&self) -> Option<Reservation> {
        let mut state = self.shared.state.lock();
        let now = Instant::now();
        let idx = state.ready.iter().position(|d| d.is_due(now))?;
        let delivery = state.ready.remove(idx)?;
        state.in_flight += 1;
        Some(Reservation {
            shared: self.shared.clone(),
            delivery,
            settled: false,
        })
    }

    /// Stops accepting envelopes and wakes idle consumers.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.space.close();
        self.shared.items.notify_waiters();
    }

    /// Removes every queued delivery, e.g. to spool it on shutdown.
    pub fn drain(&self) -> Vec<Delivery> {
        let drained: Vec<Delivery> = {
            let mut state = self.shared.state.lock();
            state.ready.drain(..).collect()
        };
        for _ in &drained {
            self.shared.release();
        }
        drained
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl Outbox for DeliveryQueue {
    async fn send(&self, envelope: Envelope) -> DispatchResult<()> {
        self.enqueue(&envelope)
            .await
            .map(|_| ())
            .map_err(|e| DispatchError::Queue(e.to_string()))
    }
}

fn encode(envelope: &Envelope) -> QueueResult<String> {
    serde_json::to_string(envelope).map_err(|e| QueueError::Serialize(e.to_string()))
}

// =============================================================================
// Reservation
// =============================================================================

/// A delivery held by one consumer until it is settled.
pub struct Reservation {
    shared: Arc<Shared>,
    delivery: Delivery,
    settled: bool,
}

impl Reservation {
    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Decodes the envelope.
    pub fn envelope(&self) -> QueueResult<Envelope> {
        serde_json::from_str(&self.delivery.body).map_err(|e| QueueError::Serialize(e.to_string()))
    }

    fn settle(&mut self) {
        self.settled = true;
        self.shared.state.lock().in_flight -= 1;
    }

    pub fn ack(mut self) {
        self.settle();
        self.shared.release();
        DeliveryMetrics::inc(&self.shared.metrics.delivered);
    }

    /// Re-queues the delivery after `delay`, counting one failed attempt.
    pub fn nack(mut self, delay: Duration) {
        self.settle();
        let mut delivery = std::mem::take(&mut self.delivery);
        delivery.attempts += 1;
        delivery.not_before = Some(Instant::now() + delay);
        debug!(id = delivery.id, attempts = delivery.attempts, ?delay, "Delivery re-queued");
        self.shared.state.lock().ready.push_back(delivery);
        DeliveryMetrics::inc(&self.shared.metrics.retried);
    }

    pub fn reject(mut self, reason: &str) {
        self.settle();
        self.shared.release();
        warn!(id = self.delivery.id, reason, "Delivery rejected");
        DeliveryMetrics::inc(&self.shared.metrics.rejected);
    }

    pub fn dead_letter(mut self, reason: &str) {
        self.settle();
        let mut delivery = std::mem::take(&mut self.delivery);
        delivery.attempts += 1;
        error!(id = delivery.id, attempts = delivery.attempts, reason, "Delivery dead-lettered");
        {
            let mut state = self.shared.state.lock();
            if self.shared.dead_capacity == 0 {
                warn!(id = delivery.id, "Dead letter discarded");
            } else {
                while state.dead.len() >= self.shared.dead_capacity {
                    if let Some(evicted) = state.dead.pop_front() {
                        warn!(id = evicted.id, "Oldest dead letter discarded");
                    }
                }
                state.dead.push_back(delivery);
            }
        }
        self.shared.release();
        DeliveryMetrics::inc(&self.shared.metrics.dead_lettered);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let delivery = std::mem::take(&mut self.delivery);
        warn!(id = delivery.id, "Unsettled delivery returned to the queue");
        {
            let mut state = self.shared.state.lock();
            state.in_flight -= 1;
            state.ready.push_front(delivery);
        }
        self.shared.items.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use chatflow_core::{Payload, SelfInfo};
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn envelope(text: &str) -> Envelope {
        Envelope::new(SelfInfo::new("slack", "B1"), "u1", "t1", Payload::text(text))
    }

    #[tokio::test]
    async fn test_try_enqueue_respects_capacity() {
        let queue = DeliveryQueue::new(2);
        assert_ok!(queue.try_enqueue(&envelope("a")));
        assert_ok!(queue.try_enqueue(&envelope("b")));
        assert_eq!(queue.try_enqueue(&envelope("c")), Err(QueueError::Full));

        // Reserved deliveries still hold capacity.
        let reservation = queue.try_reserve().unwrap();
        assert_eq!(queue.try_enqueue(&envelope("c")), Err(QueueError::Full));
        reservation.ack();
        assert_ok!(queue.try_enqueue(&envelope("c")));
        assert_eq!(queue.metrics().snapshot().delivered_total, 1);
    }

    #[tokio::test]
    async fn test_enqueue_waits_for_space() {
        let queue = DeliveryQueue::new(1);
        queue.enqueue(&envelope("a")).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(&envelope("b")).await })
        };
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        queue.try_reserve().unwrap().ack();
        assert_ok!(producer.await.unwrap());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_reservation_is_redelivered() {
        let queue = DeliveryQueue::new(4);
        queue.try_enqueue(&envelope("a")).unwrap();
        queue.try_enqueue(&envelope("b")).unwrap();

        let first = queue.try_reserve().unwrap();
        let id = first.delivery().id;
        drop(first);
        assert_eq!(queue.in_flight(), 0);

        let again = queue.try_reserve().unwrap();
        assert_eq!(again.delivery().id, id);
        assert_eq!(again.envelope().unwrap().payload, Payload::text("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nack_delays_redelivery() {
        let queue = DeliveryQueue::new(4);
        queue.try_enqueue(&envelope("a")).unwrap();
        queue.try_reserve().unwrap().nack(Duration::from_secs(5));

        assert!(queue.try_reserve().is_none());
        assert!(queue.reserve(Duration::from_secs(1)).await.is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        let retry = queue.try_reserve().unwrap();
        assert_eq!(retry.delivery().attempts, 1);
        retry.dead_letter("gave up");

        assert_eq!(queue.dead_letters().len(), 1);
        let snap = queue.metrics().snapshot();
        assert_eq!(snap.retried_total, 1);
        assert_eq!(snap.dead_lettered_total, 1);
    }

    #[tokio::test]
    async fn test_dead_letters_are_capped_and_drained() {
        let queue = DeliveryQueue::with_dead_letter_capacity(8, 2);
        for text in ["a", "b", "c"] {
            queue.try_enqueue(&envelope(text)).unwrap();
        }
        while let Some(reservation) = queue.try_reserve() {
            reservation.dead_letter("unreachable");
        }

        let kept: Vec<Payload> = queue
            .dead_letters()
            .iter()
            .map(|d| serde_json::from_str::<Envelope>(&d.body).unwrap().payload)
            .collect();
        assert_eq!(kept, [Payload::text("b"), Payload::text("c")]);
        assert_eq!(queue.metrics().snapshot().dead_lettered_total, 3);

        assert_eq!(queue.take_dead_letters().len(), 2);
        assert!(queue.dead_letters().is_empty());
        // settled dead letters free their capacity
        assert_eq!(queue.len() + queue.in_flight(), 0);
        queue.try_enqueue(&envelope("d")).unwrap();
    }

    #[tokio::test]
    async fn test_close_rejects_producers() {
        let queue = DeliveryQueue::new(4);
        queue.close();
        assert_eq!(queue.try_enqueue(&envelope("a")), Err(QueueError::Closed));
        assert_err!(queue.enqueue(&envelope("a")).await);
        assert!(queue.reserve(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_drain_and_restore() {
        let queue = DeliveryQueue::new(2);
        queue.try_enqueue(&envelope("a")).unwrap();
        queue.try_enqueue(&envelope("b")).unwrap();
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());

        let fresh = DeliveryQueue::new(1);
        assert_eq!(fresh.restore(drained), 2);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh.try_enqueue(&envelope("c")), Err(QueueError::Full));

        fresh.try_reserve().unwrap().ack();
        // The first ack repays the overdraft.
        assert_eq!(fresh.try_enqueue(&envelope("c")), Err(QueueError::Full));
        fresh.try_reserve().unwrap().ack();
        assert_ok!(fresh.try_enqueue(&envelope("c")));
        assert!(fresh.try_reserve().unwrap().delivery().id > 2);
    }

    #[tokio::test]
    async fn test_queue_as_outbox() {
        let queue = DeliveryQueue::new(1);
        let outbox: &dyn Outbox = &queue;
        assert_ok!(outbox.send(envelope("a")).await);
        assert_eq!(queue.metrics().snapshot().enqueued_total, 1);
    }
}
