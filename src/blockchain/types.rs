//! Chain-specific types and error definitions.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resilience::Transient;

// Re-export ChainConfig from config module to avoid duplication
pub use crate::config::schema::ChainConfig;

/// Token type identifier within the ledger.
pub type Color = u32;

/// Opaque reference to a prior transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outpoint(pub Bytes);

impl Outpoint {
    /// Raw bytes of the reference.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// A single output: value of one color locked to one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    #[serde(with = "decimal_u256")]
    pub value: U256,
    pub color: Color,
}

impl TxOutput {
    pub fn new(address: Address, value: U256, color: Color) -> Self {
        Self { address, value, color }
    }
}

/// An output the ledger reports as spendable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub outpoint: Outpoint,
    pub output: TxOutput,
}

/// Sum the value of all outputs of `color`.
pub fn color_balance(unspent: &[UnspentOutput], color: Color) -> U256 {
    unspent
        .iter()
        .filter(|u| u.output.color == color)
        .fold(U256::ZERO, |acc, u| acc.saturating_add(u.output.value))
}

/// Serde adapter writing `U256` as a base-10 string.
pub mod decimal_u256 {
    use alloy::primitives::U256;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        U256::from_str_radix(&s, 10)
            .map_err(|e| D::Error::custom(format!("invalid decimal amount '{}': {}", s, e)))
    }
}

/// Errors that can occur during chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC connection or request failed on every endpoint.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// The node answered but refused the call.
    #[error("Node rejected {method}: {message}")]
    Rejected { method: String, message: String },

    /// The node answered with a payload we could not decode.
    #[error("Malformed RPC response: {0}")]
    Decode(String),

    /// Invalid mnemonic, derivation or signing failure.
    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl Transient for ChainError {
    fn is_transient(&self) -> bool {
        matches!(self, ChainError::Rpc(_) | ChainError::Timeout(_))
    }
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
