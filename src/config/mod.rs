//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → DispenserConfig (validated, immutable)
//!     → cloned sections handed to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Secrets (the master mnemonic) never live in the file; see `blockchain::wallet`

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ChainConfig;
pub use schema::DispatcherConfig;
pub use schema::DispenserConfig;
pub use schema::EnvelopeConfig;
pub use schema::ObservabilityConfig;
pub use schema::RetryConfig;
