//! Envelope persistence.
//!
//! # Responsibilities
//! - Persist envelope records keyed by custodial address
//! - Allocate derivation indices atomically (conditional insert)
//! - Apply claim updates only against the version they were computed from
//!
//! # Design Decisions
//! - Every record carries a version; writers compare-and-swap on it
//! - An index and its address are reserved together, so two creates can
//!   never end up sharing a custodial account

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::envelope::types::EnvelopeRecord;
use crate::resilience::Transient;

/// A value together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Fields a claim rewrites, in persisted (string) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimUpdate {
    pub claimants: String,
    pub drain_claimants: String,
    pub max_amount: String,
}

/// Errors from the envelope store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record changed since it was read.
    #[error("Envelope {address} changed: expected version {expected}, found {actual}")]
    VersionConflict {
        address: String,
        expected: u64,
        actual: u64,
    },

    /// The derivation index or its address is already taken.
    #[error("Envelope index {index} already allocated")]
    IndexTaken { index: String },

    /// The record to update does not exist.
    #[error("Envelope {0} not found")]
    Missing(String),

    /// A stored record failed to decode.
    #[error("Corrupt envelope record {address}: {detail}")]
    Corrupt { address: String, detail: String },

    /// The backing store could not be reached.
    #[error("Envelope store unavailable: {0}")]
    Unavailable(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value storage of envelope records with conditional writes.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Number of envelopes stored.
    async fn count(&self) -> StoreResult<u64>;

    /// Insert a new record, failing with `IndexTaken` if its index or address is in use.
    async fn insert_new(&self, record: EnvelopeRecord) -> StoreResult<()>;

    /// Read a record and its current version.
    async fn get(&self, address: &str) -> StoreResult<Option<Versioned<EnvelopeRecord>>>;

    /// Apply a claim if the record is still at `expected_version`. Returns the new version.
    async fn update_claim(&self, address: &str, expected_version: u64, update: ClaimUpdate) -> StoreResult<u64>;
}

/// In-process store backed by concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryEnvelopeStore {
    records: DashMap<String, Versioned<EnvelopeRecord>>,
    /// envelope index -> address
    indices: DashMap<String, String>,
}

impl MemoryEnvelopeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EnvelopeStore for MemoryEnvelopeStore {
    async fn count(&self) -> StoreResult<u64> {
        Ok(self.records.len() as u64)
    }

    async fn insert_new(&self, record: EnvelopeRecord) -> StoreResult<()> {
        let index = record.envelope_index.clone();
        let index_slot = match self.indices.entry(index.clone()) {
            Entry::Occupied(_) => return Err(StoreError::IndexTaken { index }),
            Entry::Vacant(slot) => slot,
        };

        match self.records.entry(record.address.clone()) {
            Entry::Occupied(_) => Err(StoreError::IndexTaken { index }),
            Entry::Vacant(slot) => {
                index_slot.insert(record.address.clone());
                slot.insert(Versioned { version: 1, value: record });
                Ok(())
            }
        }
    }

    async fn get(&self, address: &str) -> StoreResult<Option<Versioned<EnvelopeRecord>>> {
        Ok(self.records.get(address).map(|r| r.value().clone()))
    }

    async fn update_claim(&self, address: &str, expected_version: u64, update: ClaimUpdate) -> StoreResult<u64> {
        let mut entry = self
            .records
            .get_mut(address)
            .ok_or_else(|| StoreError::Missing(address.to_string()))?;

        if entry.version != expected_version {
            return Err(StoreError::VersionConflict {
                address: address.to_string(),
                expected: expected_version,
                actual: entry.version,
            });
        }

        entry.value.claimants = update.claimants;
        entry.value.drain_claimants = update.drain_claimants;
        entry.value.max_amount = update.max_amount;
        entry.version += 1;
        Ok(entry.version)
    }
}
