//! Durable hand-off of payout requests from claims to the dispatcher.
//!
//! # Responsibilities
//! - Accept encoded [`PayoutRequest`] messages from the claim path
//! - Hand batches to the dispatcher with at-least-once semantics
//! - Requeue on `nack`, park poison messages on `dead_letter`
//!
//! # Design Decisions
//! - A received message stays in flight until acked; nothing is lost if the
//!   consumer dies mid-batch
//! - Message ids survive redelivery, which lets consumers drop duplicates

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::envelope::types::PayoutRequest;
use crate::resilience::Transient;

/// Errors from the payout queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing queue could not be reached.
    #[error("Payout queue unavailable: {0}")]
    Unavailable(String),

    /// The queue no longer accepts messages.
    #[error("Payout queue closed")]
    Closed,

    #[error("Failed to encode payout request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Transient for QueueError {
    fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// One delivery of a queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Stable across redeliveries of the same message.
    pub id: Uuid,
    /// 1 on first delivery.
    pub attempt: u32,
    pub body: String,
}

impl Delivery {
    /// Decode the payout request carried by this delivery.
    pub fn request(&self) -> Result<PayoutRequest, serde_json::Error> {
        PayoutRequest::from_message(&self.body)
    }
}

/// At-least-once queue of payout requests.
#[async_trait]
pub trait PayoutQueue: Send + Sync {
    /// Enqueue a request, returning its message id.
    async fn put(&self, request: &PayoutRequest) -> QueueResult<Uuid>;

    /// Take up to `max` messages. They stay in flight until acked, nacked or dead-lettered.
    async fn receive(&self, max: usize) -> QueueResult<Vec<Delivery>>;

    /// Remove a delivered message for good.
    async fn ack(&self, id: Uuid) -> QueueResult<()>;

    /// Return a delivered message to the queue for another attempt.
    async fn nack(&self, id: Uuid) -> QueueResult<()>;

    /// Park a delivered message that will not be retried again.
    async fn dead_letter(&self, id: Uuid) -> QueueResult<()>;
}

#[derive(Debug, Clone)]
struct Message {
    id: Uuid,
    deliveries: u32,
    body: String,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    in_flight: HashMap<Uuid, Message>,
    dead: Vec<Message>,
    closed: bool,
}

/// In-process queue.
#[derive(Debug, Default)]
pub struct MemoryPayoutQueue {
    state: Mutex<QueueState>,
}

impl MemoryPayoutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting new messages. Queued messages can still be received.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    /// Messages waiting to be received.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    /// Messages received but not yet settled.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Decoded bodies of every message waiting to be received, in order.
    pub async fn pending_requests(&self) -> Vec<PayoutRequest> {
        let state = self.state.lock().await;
        state
            .ready
            .iter()
            .filter_map(|m| PayoutRequest::from_message(&m.body).ok())
            .collect()
    }

    /// Dead-lettered messages, oldest first.
    pub async fn dead_letters(&self) -> Vec<Delivery> {
        let state = self.state.lock().await;
        state
            .dead
            .iter()
            .map(|m| Delivery {
                id: m.id,
                attempt: m.deliveries,
                body: m.body.clone(),
            })
            .collect()
    }

    /// Return every in-flight message to the queue, as a visibility timeout would.
    pub async fn expire_in_flight(&self) -> usize {
        let mut state = self.state.lock().await;
        let expired: Vec<Message> = state.in_flight.drain().map(|(_, m)| m).collect();
        let count = expired.len();
        state.ready.extend(expired);
        count
    }
}

#[async_trait]
impl PayoutQueue for MemoryPayoutQueue {
    async fn put(&self, request: &PayoutRequest) -> QueueResult<Uuid> {
        let body = request.to_message()?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        let id = Uuid::new_v4();
        state.ready.push_back(Message {
            id,
            deliveries: 0,
            body,
        });
        Ok(id)
    }

    async fn receive(&self, max: usize) -> QueueResult<Vec<Delivery>> {
        let mut state = self.state.lock().await;
        let take = max.min(state.ready.len());

        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            let Some(mut message) = state.ready.pop_front() else {
                break;
            };
            message.deliveries += 1;
            batch.push(Delivery {
                id: message.id,
                attempt: message.deliveries,
                body: message.body.clone(),
            });
            state.in_flight.insert(message.id, message);
        }
        Ok(batch)
    }

    async fn ack(&self, id: Uuid) -> QueueResult<()> {
        // Acking a message that already settled is a no-op
        self.state.lock().await.in_flight.remove(&id);
        Ok(())
    }

    async fn nack(&self, id: Uuid) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.in_flight.remove(&id) {
            state.ready.push_back(message);
        }
        Ok(())
    }

    async fn dead_letter(&self, id: Uuid) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if let Some(message) = state.in_flight.remove(&id) {
            tracing::warn!(message_id = %id, deliveries = message.deliveries, "Payout request dead-lettered");
            state.dead.push(message);
        }
        Ok(())
    }
}
