//! Payout subsystem.
//!
//! # Data Flow
//! ```text
//! Claim committed
//!     → queue.rs (PayoutRequest message, at-least-once)
//!     → dispatcher.rs (batch, per-account serialization)
//!     → blockchain::transaction (assemble + sign)
//!     → ChainClient broadcast
//! ```

pub mod dispatcher;
pub mod queue;

pub use dispatcher::{BatchReport, Outcome, PayoutDispatcher, PayoutError};
pub use queue::{Delivery, MemoryPayoutQueue, PayoutQueue, QueueError};
