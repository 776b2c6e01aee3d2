//! Envelope subsystem.
//!
//! # Data Flow
//! ```text
//! Create request
//!     → lifecycle.rs (validate, allocate index, persist via store.rs)
//!
//! Claim request
//!     → lifecycle.rs (versioned read from store.rs)
//!     → share.rs (claimant's slice of the peak balance)
//!     → store.rs (compare-and-swap commit)
//!     → payout queue
//! ```
//!
//! # Design Decisions
//! - Records are persisted with every field as a string (types.rs)
//! - Collaborators are injected as trait objects; no process-wide clients

pub mod error;
pub mod lifecycle;
pub mod share;
pub mod store;
pub mod types;

pub use error::{EnvelopeError, EnvelopeResult, ErrorKind};
pub use lifecycle::{ClaimRequest, ClaimResponse, CreateRequest, CreateResponse, EnvelopeLifecycle};
pub use share::share;
pub use store::{EnvelopeStore, MemoryEnvelopeStore, StoreError};
pub use types::{Envelope, EnvelopeRecord, PayoutRequest};
