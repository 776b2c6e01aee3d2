//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (envelope, index, amount) rather than formatted strings
//! - Request ID flows from the HTTP layer into handler spans
//! - Metrics are cheap when no recorder is installed

pub mod logging;
pub mod metrics;
