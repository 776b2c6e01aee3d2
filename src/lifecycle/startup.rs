//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Build the collaborators (store, queue, chain client, account deriver)
//! - Wire them into the envelope lifecycle and the payout dispatcher
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Every collaborator is constructed once here and injected; nothing is global
//! - Listeners start last (traffic only when ready), which is the caller's job

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::blockchain::{AccountDeriver, ChainClient, ChainError, RpcChainClient};
use crate::config::loader::{load_config, ConfigError};
use crate::config::DispenserConfig;
use crate::envelope::{EnvelopeError, EnvelopeLifecycle, MemoryEnvelopeStore};
use crate::payout::{MemoryPayoutQueue, PayoutDispatcher};

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Seed(EnvelopeError),

    #[error("Chain client setup failed: {0}")]
    Chain(ChainError),

    #[error("Listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything the binary runs.
pub struct Services {
    pub lifecycle: Arc<EnvelopeLifecycle>,
    pub dispatcher: Arc<PayoutDispatcher>,
    pub store: Arc<MemoryEnvelopeStore>,
    pub queue: Arc<MemoryPayoutQueue>,
}

/// Load the config file, or fall back to defaults when no path is given.
pub fn load(path: Option<&Path>) -> Result<DispenserConfig, StartupError> {
    match path {
        Some(path) => Ok(load_config(path)?),
        None => Ok(DispenserConfig::default()),
    }
}

/// The deriver for the mnemonic in the environment.
pub fn deriver_from_env() -> Result<AccountDeriver, StartupError> {
    AccountDeriver::from_env().map_err(|e| StartupError::Seed(EnvelopeError::InvalidSeed(e.to_string())))
}

/// The JSON-RPC chain client described by `config.chain`.
pub fn chain_client(config: &DispenserConfig) -> Result<Arc<dyn ChainClient>, StartupError> {
    let client = RpcChainClient::new(config.chain.clone()).map_err(StartupError::Chain)?;
    Ok(Arc::new(client))
}

/// Wire the lifecycle and dispatcher around one shared store and queue.
pub fn build_services(config: &DispenserConfig, deriver: AccountDeriver, chain: Arc<dyn ChainClient>) -> Services {
    let store = Arc::new(MemoryEnvelopeStore::new());
    let queue = Arc::new(MemoryPayoutQueue::new());

    let lifecycle = Arc::new(EnvelopeLifecycle::new(
        store.clone(),
        chain.clone(),
        queue.clone(),
        deriver.clone(),
        config.retries.clone(),
        config.envelope.clone(),
    ));
    let dispatcher = Arc::new(PayoutDispatcher::new(
        queue.clone(),
        chain,
        deriver,
        config.dispatcher.clone(),
        config.retries.clone(),
    ));

    Services {
        lifecycle,
        dispatcher,
        store,
        queue,
    }
}
