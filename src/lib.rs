//! Envelope dispenser library.
//!
//! A funder creates an envelope (a freshly derived custodial account) and
//! deposits colored tokens into it; claimants then each receive a
//! deterministic, pseudo-random share of the envelope's peak balance, paid
//! out by a background dispatcher.

// Core subsystems
pub mod blockchain;
pub mod config;
pub mod envelope;
pub mod http;
pub mod payout;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::DispenserConfig;
pub use envelope::EnvelopeLifecycle;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use payout::PayoutDispatcher;
