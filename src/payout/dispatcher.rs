//! Payout dispatcher: turns queued payout requests into broadcast transactions.
//!
//! # Responsibilities
//! - Poll the payout queue and drain it in batches
//! - Assemble, sign and broadcast one transaction per request
//! - Settle each delivery: ack, requeue or dead-letter
//!
//! # Data Flow
//! ```text
//! queue.receive(batch_size)
//!     → group by paying account (address_index)
//!     → accounts in parallel (≤ max_concurrency), requests within one in order
//!     → derive account → unspent outputs → assemble → sign → broadcast
//!     → ack | nack | dead_letter
//! ```
//!
//! # Design Decisions
//! - Requests sharing a paying account never run concurrently, in this batch
//!   or across batches, so two payouts cannot select the same inputs
//! - A failed request never affects the rest of its batch
//! - Ids of paid messages are remembered, so a redelivered message is acked
//!   without paying twice
//! - Rebroadcasting the same signed transaction is safe; reassembling is not,
//!   so broadcast failures are retried in place before the message is requeued

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::blockchain::transaction::{assemble, AssemblyError};
use crate::blockchain::types::{ChainError, Color};
use crate::blockchain::{AccountDeriver, ChainClient};
use crate::config::{DispatcherConfig, RetryConfig};
use crate::envelope::types::PayoutRequest;
use crate::observability::metrics;
use crate::payout::queue::{Delivery, PayoutQueue, QueueError, QueueResult};
use crate::resilience::{retry_transient, Transient};

/// How many paid message ids are remembered for duplicate detection.
const SETTLED_CAPACITY: usize = 10_000;

/// Errors settling a single payout request.
#[derive(Debug, Error)]
pub enum PayoutError {
    /// The message body is not a payout request.
    #[error("Malformed payout message: {0}")]
    Malformed(String),

    /// The paying account owns no outputs.
    #[error("No tokens in the paying account")]
    NoFunds,

    #[error("Insufficient funds of color {color}: have {available}, need {requested}")]
    InsufficientFunds {
        color: Color,
        available: U256,
        requested: U256,
    },

    #[error("Cannot assemble payout: {0}")]
    Assembly(AssemblyError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<AssemblyError> for PayoutError {
    fn from(e: AssemblyError) -> Self {
        match e {
            AssemblyError::NoFunds => PayoutError::NoFunds,
            AssemblyError::InsufficientFunds {
                color,
                available,
                requested,
            } => PayoutError::InsufficientFunds {
                color,
                available,
                requested,
            },
            other => PayoutError::Assembly(other),
        }
    }
}

impl Transient for PayoutError {
    fn is_transient(&self) -> bool {
        match self {
            PayoutError::Chain(e) => e.is_transient(),
            PayoutError::Queue(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Broadcast accepted; carries the node's transaction hash.
    Paid(String),
    /// Already paid under the same message id.
    Duplicate,
    /// Permanent failure; parked in the dead-letter queue.
    Failed,
    /// Transient failure; returned to the queue.
    Requeued,
    /// Transient failure on the last allowed delivery.
    DeadLettered,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Paid(_) => "paid",
            Outcome::Duplicate => "duplicate",
            Outcome::Failed => "failed",
            Outcome::Requeued => "requeued",
            Outcome::DeadLettered => "dead_lettered",
        }
    }
}

/// Tally of one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub paid: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Paid(_) => self.paid += 1,
            Outcome::Duplicate => self.duplicates += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Requeued => self.requeued += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.paid + self.duplicates + self.failed + self.requeued + self.dead_lettered
    }
}

/// Bounded, insertion-ordered set of paid message ids.
#[derive(Debug, Default)]
struct SettledIds {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SettledIds {
    fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: Uuid) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > SETTLED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }
}

/// Drains the payout queue.
pub struct PayoutDispatcher {
    queue: Arc<dyn PayoutQueue>,
    chain: Arc<dyn ChainClient>,
    deriver: AccountDeriver,
    config: DispatcherConfig,
    retries: RetryConfig,
    account_locks: DashMap<u32, Arc<Mutex<()>>>,
    settled: Mutex<SettledIds>,
}

impl PayoutDispatcher {
    pub fn new(
        queue: Arc<dyn PayoutQueue>,
        chain: Arc<dyn ChainClient>,
        deriver: AccountDeriver,
        config: DispatcherConfig,
        retries: RetryConfig,
    ) -> Self {
        Self {
            queue,
            chain,
            deriver,
            config,
            retries,
            account_locks: DashMap::new(),
            settled: Mutex::new(SettledIds::default()),
        }
    }

    /// Poll the queue until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.poll_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrency = self.config.max_concurrency,
            "Payout dispatcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Payout dispatcher stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.drain_once().await {
                        tracing::warn!(error = %e, "Failed to receive payout batch");
                    }
                }
            }
        }
    }

    /// Receive one batch and process it.
    pub async fn drain_once(&self) -> QueueResult<BatchReport> {
        let deliveries = self.queue.receive(self.config.batch_size).await?;
        if deliveries.is_empty() {
            return Ok(BatchReport::default());
        }

        metrics::record_batch(deliveries.len());
        let report = self.process_batch(deliveries).await;
        tracing::info!(
            paid = report.paid,
            duplicates = report.duplicates,
            failed = report.failed,
            requeued = report.requeued,
            dead_lettered = report.dead_lettered,
            tracked_accounts = self.tracked_accounts(),
            "Payout batch processed"
        );
        Ok(report)
    }

    /// Settle every delivery of a batch. Never fails as a whole.
    pub async fn process_batch(&self, deliveries: Vec<Delivery>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut by_account: BTreeMap<u32, Vec<(Delivery, PayoutRequest)>> = BTreeMap::new();

        for delivery in deliveries {
            match delivery.request() {
                Ok(request) => by_account
                    .entry(request.address_index)
                    .or_default()
                    .push((delivery, request)),
                Err(e) => {
                    let error = PayoutError::Malformed(e.to_string());
                    tracing::error!(message_id = %delivery.id, error = %error, "Dropping undecodable payout message");
                    let outcome = self.settle_failure(&delivery, &error).await;
                    metrics::record_payout(outcome.label());
                    report.record(&outcome);
                }
            }
        }

        let outcomes: Vec<Vec<Outcome>> = stream::iter(by_account)
            .map(|(index, group)| self.process_account(index, group))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes.iter().flatten() {
            report.record(outcome);
        }
        report
    }

    /// Settle one account's requests in order, holding the account's lock.
    async fn process_account(&self, index: u32, group: Vec<(Delivery, PayoutRequest)>) -> Vec<Outcome> {
        let lock = self
            .account_locks
            .entry(index)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;

        let mut outcomes = Vec::with_capacity(group.len());
        for (delivery, request) in group {
            let outcome = self.settle(&delivery, &request).await;
            metrics::record_payout(outcome.label());
            outcomes.push(outcome);
        }

        drop(guard);
        drop(lock);
        // Only the map's own handle left means no group is waiting on this account
        self.account_locks
            .remove_if(&index, |_, lock| Arc::strong_count(lock) == 1);
        outcomes
    }

    /// Accounts with a payout group in progress or waiting.
    pub fn tracked_accounts(&self) -> usize {
        self.account_locks.len()
    }

    async fn settle(&self, delivery: &Delivery, request: &PayoutRequest) -> Outcome {
        if self.settled.lock().await.contains(&delivery.id) {
            tracing::info!(message_id = %delivery.id, "Duplicate payout delivery, acknowledging");
            self.settle_queue(delivery.id, self.queue.ack(delivery.id).await);
            return Outcome::Duplicate;
        }

        match self.pay(request).await {
            Ok(tx_hash) => {
                self.settled.lock().await.insert(delivery.id);
                tracing::info!(
                    message_id = %delivery.id,
                    index = request.address_index,
                    claimant = %request.claimant_addr,
                    amount = %request.amount,
                    tx_hash = %tx_hash,
                    "Payout broadcast"
                );
                self.settle_queue(delivery.id, self.queue.ack(delivery.id).await);
                Outcome::Paid(tx_hash)
            }
            Err(e) => self.settle_failure(delivery, &e).await,
        }
    }

    async fn settle_failure(&self, delivery: &Delivery, error: &PayoutError) -> Outcome {
        if !error.is_transient() {
            tracing::error!(message_id = %delivery.id, error = %error, "Payout failed permanently");
            self.settle_queue(delivery.id, self.queue.dead_letter(delivery.id).await);
            return Outcome::Failed;
        }

        if delivery.attempt >= self.config.max_deliveries {
            tracing::error!(
                message_id = %delivery.id,
                attempt = delivery.attempt,
                error = %error,
                "Payout delivery budget exhausted"
            );
            self.settle_queue(delivery.id, self.queue.dead_letter(delivery.id).await);
            return Outcome::DeadLettered;
        }

        tracing::warn!(message_id = %delivery.id, attempt = delivery.attempt, error = %error, "Payout requeued");
        self.settle_queue(delivery.id, self.queue.nack(delivery.id).await);
        Outcome::Requeued
    }

    fn settle_queue(&self, id: Uuid, result: QueueResult<()>) {
        if let Err(e) = result {
            // The message will come back; the settled set keeps it from paying twice
            tracing::warn!(message_id = %id, error = %e, "Failed to settle payout message");
        }
    }

    /// Assemble, sign and broadcast one payout. Returns the transaction hash.
    async fn pay(&self, request: &PayoutRequest) -> Result<String, PayoutError> {
        let account = self.deriver.derive(request.address_index)?;
        let payer = account.address();

        let unspent =
            retry_transient(&self.retries, "chain.unspent_outputs", || self.chain.unspent_outputs(payer)).await?;
        let payout = assemble(&unspent, payer, request.claimant_addr, request.color, request.amount)?;
        tracing::debug!(
            index = request.address_index,
            inputs = payout.inputs().len(),
            outputs = payout.outputs().len(),
            "Payout assembled"
        );

        let signed = payout.sign(&account).await?;
        let raw = signed.to_hex();
        let tx_hash = retry_transient(&self.retries, "chain.send_raw_transaction", || {
            self.chain.send_raw_transaction(&raw)
        })
        .await?;
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_ids_are_bounded() {
        let mut settled = SettledIds::default();
        let first = Uuid::new_v4();
        settled.insert(first);
        settled.insert(first);
        assert_eq!(settled.order.len(), 1);

        for _ in 0..SETTLED_CAPACITY {
            settled.insert(Uuid::new_v4());
        }
        assert_eq!(settled.order.len(), SETTLED_CAPACITY);
        assert!(!settled.contains(&first));
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(PayoutError::from(AssemblyError::NoFunds), PayoutError::NoFunds));
        assert!(!PayoutError::NoFunds.is_transient());
        assert!(PayoutError::from(ChainError::Timeout(10)).is_transient());
        assert!(!PayoutError::from(ChainError::Rejected {
            method: "eth_sendRawTransaction".into(),
            message: "double spend".into(),
        })
        .is_transient());
        assert!(!PayoutError::from(AssemblyError::ZeroAmount).is_transient());
    }

    #[test]
    fn test_report_tally() {
        let mut report = BatchReport::default();
        for outcome in [Outcome::Paid("0x1".into()), Outcome::Failed, Outcome::Requeued, Outcome::Duplicate] {
            report.record(&outcome);
        }
        assert_eq!(report.paid, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total(), 4);
    }
}
