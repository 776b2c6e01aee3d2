//! Ledger integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment variable (master mnemonic)
//!     → wallet.rs (derive custodial account N, signing)
//!     → client.rs (unspent-output queries, broadcast, with timeouts + failover)
//!     → transaction.rs (select inputs, balance outputs, sign, encode)
//! ```
//!
//! # Security Constraints
//! - The mnemonic ONLY comes from the environment
//! - Never log mnemonics, keys or signatures
//! - All RPC calls have configurable timeouts
//! - Token amounts are always `U256`, never floating point

pub mod client;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use client::{ChainClient, RpcChainClient};
pub use transaction::{assemble, AssemblyError, DecodedPayout, SignedPayout, UnsignedPayout};
pub use types::{color_balance, ChainError, ChainResult, Color, Outpoint, TxOutput, UnspentOutput};
pub use wallet::{AccountDeriver, DerivedAccount};
