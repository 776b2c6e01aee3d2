//! Custodial account derivation and signing.
//!
//! # Security
//! - The master mnemonic is loaded ONLY from an environment variable
//! - Mnemonics and keys are never logged or serialized
//! - Derived signers are cached so each index pays the BIP-39 stretch once

use alloy::primitives::{Address, B256};
use alloy::signers::local::coins_bip39::English;
use alloy::signers::local::{MnemonicBuilder, PrivateKeySigner};
use alloy::signers::{Signature, Signer};
use dashmap::DashMap;
use std::sync::Arc;

use crate::blockchain::types::{ChainError, ChainResult};

/// Environment variable name for the master mnemonic.
pub const MNEMONIC_ENV_VAR: &str = "DISPENSER_MNEMONIC";

/// BIP-44 prefix; the account index is appended as the last, non-hardened step.
pub const DERIVATION_PATH_PREFIX: &str = "m/44'/60'/0'/0/";

/// Derived signers kept in memory before old ones are evicted.
pub const DEFAULT_SIGNER_CACHE: usize = 4_096;

/// Deterministically maps an index to a custodial account.
#[derive(Clone)]
pub struct AccountDeriver {
    phrase: Arc<str>,
    signers: Arc<DashMap<u32, PrivateKeySigner>>,
    cache_capacity: usize,
}

impl AccountDeriver {
    /// Create a deriver from a BIP-39 English mnemonic.
    ///
    /// The phrase is checked up front by deriving account 0, so a malformed
    /// seed fails here rather than on the first request.
    pub fn from_mnemonic(phrase: &str) -> ChainResult<Self> {
        let deriver = Self {
            phrase: Arc::from(phrase.trim()),
            signers: Arc::new(DashMap::new()),
            cache_capacity: DEFAULT_SIGNER_CACHE,
        };
        let first = deriver.derive(0)?;

        tracing::info!(first_account = %first.address(), "Account deriver initialized");
        Ok(deriver)
    }

    /// Load the mnemonic from `DISPENSER_MNEMONIC`.
    pub fn from_env() -> ChainResult<Self> {
        let phrase = std::env::var(MNEMONIC_ENV_VAR).map_err(|_| {
            ChainError::Wallet(format!("Environment variable {} not set", MNEMONIC_ENV_VAR))
        })?;

        Self::from_mnemonic(&phrase)
    }

    /// Derive the account at `index`. The same index always yields the same account.
    pub fn derive(&self, index: u32) -> ChainResult<DerivedAccount> {
        if let Some(signer) = self.signers.get(&index) {
            return Ok(DerivedAccount {
                index,
                signer: signer.value().clone(),
            });
        }

        let signer = MnemonicBuilder::<English>::default()
            .phrase(self.phrase.as_ref())
            .index(index)
            .map_err(|e| ChainError::Wallet(format!("Invalid derivation index {}: {}", index, e)))?
            .build()
            .map_err(|e| ChainError::Wallet(format!("Mnemonic invalid or undefined: {}", e)))?;

        if self.signers.len() >= self.cache_capacity {
            // Evicted accounts are simply re-derived on next use
            let victim = self.signers.iter().next().map(|entry| *entry.key());
            if let Some(victim) = victim {
                self.signers.remove(&victim);
            }
        }
        self.signers.insert(index, signer.clone());
        Ok(DerivedAccount { index, signer })
    }

    /// Cap the number of cached signers (at least one).
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity.max(1);
        self
    }

    /// Number of signers currently cached.
    pub fn cached_accounts(&self) -> usize {
        self.signers.len()
    }
}

impl std::fmt::Debug for AccountDeriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountDeriver")
            .field("path_prefix", &DERIVATION_PATH_PREFIX)
            .field("cached_accounts", &self.signers.len())
            .field("cache_capacity", &self.cache_capacity)
            .finish()
    }
}

/// One derived account: an address plus the key that controls it.
#[derive(Clone)]
pub struct DerivedAccount {
    index: u32,
    signer: PrivateKeySigner,
}

impl DerivedAccount {
    /// Derivation index of this account.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Address controlled by this account.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign a 32-byte digest.
    pub async fn sign_hash(&self, hash: B256) -> ChainResult<Signature> {
        self.signer
            .sign_hash(&hash)
            .await
            .map_err(|e| ChainError::Wallet(format!("Signing failed: {}", e)))
    }
}

impl std::fmt::Debug for DerivedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedAccount")
            .field("index", &self.index)
            .field("address", &self.address())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Public test phrase; never fund these accounts
    const TEST_MNEMONIC: &str =
        "unable drop gospel simple danger elbow brand head shrug cereal lens grain";

    #[test]
    fn test_known_derivation() {
        let deriver = AccountDeriver::from_mnemonic(TEST_MNEMONIC).unwrap();
        let account = deriver.derive(3).unwrap();
        assert_eq!(
            account.address().to_string().to_lowercase(),
            "0x27f748becc70b70e81177266a55c1c93738a2b07"
        );
        assert_eq!(account.index(), 3);
    }

    #[test]
    fn test_derivation_is_deterministic_and_distinct() {
        let deriver = AccountDeriver::from_mnemonic(TEST_MNEMONIC).unwrap();
        let a = deriver.derive(7).unwrap().address();
        let b = deriver.derive(7).unwrap().address();
        let c = deriver.derive(8).unwrap().address();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let other = AccountDeriver::from_mnemonic(TEST_MNEMONIC).unwrap();
        assert_eq!(other.derive(7).unwrap().address(), a);
    }

    #[test]
    fn test_signer_cache_is_bounded() {
        let deriver = AccountDeriver::from_mnemonic(TEST_MNEMONIC)
            .unwrap()
            .with_cache_capacity(2);
        let before = deriver.derive(3).unwrap().address();
        for index in 10..15 {
            deriver.derive(index).unwrap();
            assert!(deriver.cached_accounts() <= 2);
        }
        // Evicted or not, an index keeps mapping to the same account
        assert_eq!(deriver.derive(3).unwrap().address(), before);
        assert!(deriver.cached_accounts() <= 2);
    }

    #[test]
    fn test_invalid_mnemonic() {
        let result = AccountDeriver::from_mnemonic("bla bla bla");
        assert!(matches!(result, Err(ChainError::Wallet(_))));
    }

    #[test]
    fn test_debug_redacts_phrase() {
        let deriver = AccountDeriver::from_mnemonic(TEST_MNEMONIC).unwrap();
        let printed = format!("{:?}", deriver);
        assert!(!printed.contains("gospel"));
    }

    #[tokio::test]
    async fn test_sign_hash() {
        let deriver = AccountDeriver::from_mnemonic(TEST_MNEMONIC).unwrap();
        let account = deriver.derive(1).unwrap();
        let hash = alloy::primitives::keccak256(b"payout");
        let signature = account.sign_hash(hash).await.unwrap();
        assert_eq!(signature.as_bytes().len(), 65);
        assert_eq!(
            signature.recover_address_from_prehash(&hash).unwrap(),
            account.address()
        );
    }
}
