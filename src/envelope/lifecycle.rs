//! Envelope creation and claiming.
//!
//! # Responsibilities
//! - Validate create/claim requests
//! - Allocate a fresh derivation index per envelope
//! - Compute a claimant's share against the envelope's peak balance
//! - Commit the claim, then queue the payout
//!
//! # Data Flow
//! ```text
//! handle_create:
//!     validate → count (hint) → derive account N → insert_new (N taken? try N+1)
//!
//! handle_claim:
//!     validate → get (versioned) → unspent outputs → share → update_claim (CAS)
//!         → version moved? re-run from get
//!         → committed → queue payout
//! ```
//!
//! # Design Decisions
//! - `update_claim` is the only mutation; a claim that fails or times out
//!   before it leaves the envelope untouched
//! - The payout is queued only after the commit, so a lost race never pays
//! - Transient store/chain/queue failures are retried here with backoff;
//!   business-rule failures return immediately

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::blockchain::types::{color_balance, decimal_u256, ChainError, Color};
use crate::blockchain::{AccountDeriver, ChainClient};
use crate::config::{EnvelopeConfig, RetryConfig};
use crate::envelope::error::{EnvelopeError, EnvelopeResult};
use crate::envelope::share::share;
use crate::envelope::store::{ClaimUpdate, EnvelopeStore, StoreError};
use crate::envelope::types::{address_key, parse_address, Envelope, EnvelopeRecord, PayoutRequest, MAX_RECIPIENTS};
use crate::observability::metrics;
use crate::payout::queue::PayoutQueue;
use crate::resilience::retry_transient;

/// Create request: `{numRecipients, color, from}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub num_recipients: i64,
    pub color: Color,
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateResponse {
    pub address: String,
}

/// Claim request: `{envelopeAddr, claimantAddr}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub envelope_addr: String,
    pub claimant_addr: String,
}

/// Claim response; `amount` travels as a decimal string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    #[serde(with = "decimal_u256")]
    pub amount: U256,
}

/// Outcome of one committed claim attempt.
struct Committed {
    amount: U256,
    slot: usize,
    drained: bool,
    payout: Option<PayoutRequest>,
}

/// Creates envelopes and settles claims against them.
pub struct EnvelopeLifecycle {
    store: Arc<dyn EnvelopeStore>,
    chain: Arc<dyn ChainClient>,
    queue: Arc<dyn PayoutQueue>,
    deriver: AccountDeriver,
    retries: RetryConfig,
    config: EnvelopeConfig,
}

impl EnvelopeLifecycle {
    pub fn new(
        store: Arc<dyn EnvelopeStore>,
        chain: Arc<dyn ChainClient>,
        queue: Arc<dyn PayoutQueue>,
        deriver: AccountDeriver,
        retries: RetryConfig,
        config: EnvelopeConfig,
    ) -> Self {
        Self {
            store,
            chain,
            queue,
            deriver,
            retries,
            config,
        }
    }

    /// Create an envelope funded by `from`, split between `num_recipients` claimants.
    pub async fn handle_create(&self, request: CreateRequest) -> EnvelopeResult<CreateResponse> {
        let funder = parse_address(&request.from).ok_or_else(|| EnvelopeError::InvalidAddress(request.from.clone()))?;
        let num_recipients = u8::try_from(request.num_recipients)
            .ok()
            .filter(|n| (1..=MAX_RECIPIENTS).contains(n))
            .ok_or(EnvelopeError::InvalidRecipientCount(request.num_recipients))?;

        // The count is only where probing starts; insert_new decides ownership
        let hint = retry_transient(&self.retries, "store.count", || self.store.count()).await?;
        let start = u32::try_from(hint)
            .map_err(|_| ChainError::Wallet(format!("derivation index {} out of range", hint)))?;

        for probe in 0..self.config.max_index_probes.max(1) {
            let index = start
                .checked_add(probe)
                .ok_or_else(|| ChainError::Wallet("derivation index space exhausted".to_string()))?;
            let account = self.deriver.derive(index)?;
            let envelope = Envelope::new(account.address(), index, request.color, funder, num_recipients);
            let record = EnvelopeRecord::from(&envelope);

            match retry_transient(&self.retries, "store.insert_new", || self.store.insert_new(record.clone())).await {
                Ok(()) => {
                    metrics::record_envelope_created();
                    tracing::info!(
                        envelope = %record.address,
                        index = index,
                        color = request.color,
                        recipients = num_recipients,
                        funder = %funder,
                        "Envelope created"
                    );
                    return Ok(CreateResponse { address: record.address });
                }
                Err(StoreError::IndexTaken { .. }) => {
                    metrics::record_store_conflict();
                    tracing::debug!(index = index, "Envelope index taken, probing next");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(start = start, probes = self.config.max_index_probes, "No free envelope index found");
        Err(EnvelopeError::Conflict("index allocation".to_string()))
    }

    /// Claim a share of `envelope_addr` for `claimant_addr`.
    ///
    /// A claim that loses an update race is re-run from a fresh read up to
    /// `claim_conflict_retries` times before surfacing `Conflict`.
    pub async fn handle_claim(&self, request: ClaimRequest) -> EnvelopeResult<ClaimResponse> {
        let result = self.claim(&request).await;
        if let Err(e) = &result {
            metrics::record_claim(e.kind().as_str());
        }
        result
    }

    async fn claim(&self, request: &ClaimRequest) -> EnvelopeResult<ClaimResponse> {
        let claimant = parse_address(&request.claimant_addr)
            .ok_or_else(|| EnvelopeError::InvalidAddress(request.claimant_addr.clone()))?;
        // Nothing can be stored under a malformed address
        let key = parse_address(&request.envelope_addr)
            .map(|a| address_key(&a))
            .ok_or_else(|| EnvelopeError::EnvelopeNotFound(request.envelope_addr.clone()))?;

        let mut attempt = 0;
        let committed = loop {
            attempt += 1;
            match self.try_claim(&key, claimant).await {
                Ok(committed) => break committed,
                Err(EnvelopeError::Store(StoreError::VersionConflict { expected, actual, .. })) => {
                    metrics::record_store_conflict();
                    if attempt > self.config.claim_conflict_retries {
                        tracing::warn!(envelope = %key, claimant = %claimant, attempts = attempt, "Claim kept conflicting");
                        return Err(EnvelopeError::Conflict(key));
                    }
                    tracing::debug!(
                        envelope = %key,
                        expected = expected,
                        actual = actual,
                        "Envelope changed during claim, re-running"
                    );
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(payout) = &committed.payout {
            let message_id = retry_transient(&self.retries, "queue.put", || self.queue.put(payout))
                .await
                .inspect_err(|e| {
                    tracing::error!(
                        envelope = %key,
                        claimant = %claimant,
                        amount = %committed.amount,
                        error = %e,
                        "Claim recorded but payout could not be queued"
                    );
                })?;
            tracing::debug!(envelope = %key, message_id = %message_id, "Payout queued");
        }

        metrics::record_claim(if committed.drained { "drained" } else { "claimed" });
        tracing::info!(
            envelope = %key,
            claimant = %claimant,
            slot = committed.slot,
            drained = committed.drained,
            amount = %committed.amount,
            "Envelope claimed"
        );

        Ok(ClaimResponse { amount: committed.amount })
    }

    /// One read-compute-commit pass of a claim.
    async fn try_claim(&self, key: &str, claimant: Address) -> EnvelopeResult<Committed> {
        let snapshot = retry_transient(&self.retries, "store.get", || self.store.get(key))
            .await?
            .ok_or_else(|| EnvelopeError::EnvelopeNotFound(key.to_string()))?;
        let version = snapshot.version;
        let mut envelope = Envelope::try_from(snapshot.value)?;

        if envelope.has_claimed(&claimant) {
            return Err(EnvelopeError::AlreadyClaimed {
                envelope: key.to_string(),
                claimant: address_key(&claimant),
            });
        }

        let owner = envelope.address;
        let unspent = retry_transient(&self.retries, "chain.unspent_outputs", || self.chain.unspent_outputs(owner)).await?;
        let balance = color_balance(&unspent, envelope.color);
        if balance.is_zero() {
            return Err(EnvelopeError::EnvelopeDepleted(key.to_string()));
        }

        let effective = balance.max(envelope.max_amount);
        let slot = envelope.claims_made();
        let drained = slot >= envelope.num_recipients as usize;

        let amount = if drained {
            envelope.drain_claimants.push(claimant);
            balance
        } else {
            envelope.claimants.push(claimant);
            share(key, envelope.num_recipients, effective, slot).ok_or_else(|| StoreError::Corrupt {
                address: key.to_string(),
                detail: format!("slot {} outside {} recipients", slot, envelope.num_recipients),
            })?
        };
        envelope.max_amount = effective;

        let update = ClaimUpdate {
            claimants: envelope.claimants.encode(),
            drain_claimants: envelope.drain_claimants.encode(),
            max_amount: envelope.max_amount.to_string(),
        };
        retry_transient(&self.retries, "store.update_claim", || {
            self.store.update_claim(key, version, update.clone())
        })
        .await?;

        let payout = (!amount.is_zero()).then(|| PayoutRequest {
            claimant_addr: claimant,
            address_index: envelope.envelope_index,
            color: envelope.color,
            amount,
        });

        Ok(Committed {
            amount,
            slot,
            drained,
            payout,
        })
    }

    /// Current state of the envelope at `address`.
    pub async fn envelope(&self, address: &str) -> EnvelopeResult<Envelope> {
        let key = parse_address(address)
            .map(|a| address_key(&a))
            .ok_or_else(|| EnvelopeError::EnvelopeNotFound(address.to_string()))?;
        let snapshot = retry_transient(&self.retries, "store.get", || self.store.get(&key))
            .await?
            .ok_or_else(|| EnvelopeError::EnvelopeNotFound(key.clone()))?;
        Ok(Envelope::try_from(snapshot.value)?)
    }
}
