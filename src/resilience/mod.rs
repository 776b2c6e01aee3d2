//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Store / queue / chain call:
//!     → retries.rs (classify failure, retry transient ones)
//!     → backoff.rs (exponential delay with jitter between attempts)
//! ```
//!
//! # Design Decisions
//! - Timeouts live in the clients themselves; every chain call has a deadline
//! - Only connectivity failures are retried; validation and business-rule errors are final
//! - Jittered backoff prevents thundering herd against the node

pub mod backoff;
pub mod retries;

pub use retries::{retry_transient, Transient};
