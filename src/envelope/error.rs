//! Caller-facing error taxonomy for envelope operations.

use thiserror::Error;

use crate::blockchain::types::ChainError;
use crate::envelope::store::StoreError;
use crate::payout::queue::QueueError;
use crate::resilience::Transient;

/// Broad class of an [`EnvelopeError`], used for status mapping and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Depleted,
    Infra,
    Internal,
}

impl ErrorKind {
    /// Label used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Depleted => "depleted",
            ErrorKind::Infra => "infra",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Errors returned by `handle_create` / `handle_claim`.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Bad Request: Not a valid address: {0}")]
    InvalidAddress(String),

    #[error("Bad Request: Number of recipients must be between 1 and 16, got {0}")]
    InvalidRecipientCount(i64),

    #[error("Bad Request: Mnemonic invalid or undefined: {0}")]
    InvalidSeed(String),

    #[error("Envelope doesn't exist on address: {0}")]
    EnvelopeNotFound(String),

    #[error("{claimant} already claimed from {envelope}")]
    AlreadyClaimed { envelope: String, claimant: String },

    /// Concurrent writers kept winning; the caller may try again.
    #[error("Envelope {0} is busy, try again")]
    Conflict(String),

    #[error("Envelope depleted: {0}")]
    EnvelopeDepleted(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EnvelopeError::InvalidAddress(_)
            | EnvelopeError::InvalidRecipientCount(_)
            | EnvelopeError::InvalidSeed(_) => ErrorKind::Validation,
            EnvelopeError::EnvelopeNotFound(_) => ErrorKind::NotFound,
            EnvelopeError::AlreadyClaimed { .. } | EnvelopeError::Conflict(_) => ErrorKind::Conflict,
            EnvelopeError::EnvelopeDepleted(_) => ErrorKind::Depleted,
            EnvelopeError::Store(StoreError::VersionConflict { .. })
            | EnvelopeError::Store(StoreError::IndexTaken { .. }) => ErrorKind::Conflict,
            EnvelopeError::Store(StoreError::Missing(_)) => ErrorKind::NotFound,
            EnvelopeError::Store(StoreError::Corrupt { .. }) => ErrorKind::Internal,
            EnvelopeError::Chain(ChainError::Wallet(_))
            | EnvelopeError::Chain(ChainError::Decode(_))
            | EnvelopeError::Chain(ChainError::Rejected { .. }) => ErrorKind::Internal,
            EnvelopeError::Store(StoreError::Unavailable(_))
            | EnvelopeError::Chain(_)
            | EnvelopeError::Queue(_) => ErrorKind::Infra,
        }
    }

    /// Whether the caller may usefully repeat the request.
    pub fn is_retryable(&self) -> bool {
        match self {
            EnvelopeError::Conflict(_) => true,
            EnvelopeError::Store(e) => e.is_transient(),
            EnvelopeError::Chain(e) => e.is_transient(),
            EnvelopeError::Queue(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
