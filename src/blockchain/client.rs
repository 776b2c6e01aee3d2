//! Ledger RPC client with timeout and failover.
//!
//! # Responsibilities
//! - Query unspent outputs owned by an address
//! - Broadcast signed transactions
//! - Handle timeouts and network errors gracefully, falling over to backup endpoints

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::blockchain::types::{ChainConfig, ChainError, ChainResult, UnspentOutput};
use crate::observability::metrics;

/// Read and broadcast access to the unspent-output ledger.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// All spendable outputs currently owned by `address`, in ledger order.
    async fn unspent_outputs(&self, address: Address) -> ChainResult<Vec<UnspentOutput>>;

    /// Broadcast a signed, hex-encoded transaction. Returns the node's transaction id.
    async fn send_raw_transaction(&self, signed_tx_hex: &str) -> ChainResult<String>;
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC ledger client with failover support.
#[derive(Clone)]
pub struct RpcChainClient {
    http: reqwest::Client,
    /// Primary endpoint followed by failovers.
    endpoints: Vec<url::Url>,
    config: ChainConfig,
    timeout_duration: Duration,
    next_id: std::sync::Arc<AtomicU64>,
}

impl RpcChainClient {
    /// Create a new ledger client.
    ///
    /// Failover URLs that do not parse are skipped with a warning; an invalid
    /// primary URL is an error.
    pub fn new(config: ChainConfig) -> ChainResult<Self> {
        let timeout_duration = Duration::from_secs(config.rpc_timeout_secs);

        let primary: url::Url = config.rpc_url.parse().map_err(|e| {
            ChainError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;
        let mut endpoints = vec![primary];

        for url_str in &config.failover_urls {
            match url_str.parse() {
                Ok(url) => endpoints.push(url),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        let http = reqwest::Client::builder()
            .timeout(timeout_duration)
            .build()
            .map_err(|e| ChainError::Rpc(format!("Failed to build HTTP client: {}", e)))?;

        tracing::info!(
            rpc_url = %config.rpc_url,
            failovers = endpoints.len() - 1,
            "Ledger client initialized"
        );

        Ok(Self {
            http,
            endpoints,
            config,
            timeout_duration,
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        })
    }

    /// Issue one JSON-RPC call, trying each endpoint in turn.
    ///
    /// Transport failures and timeouts move on to the next endpoint. An explicit
    /// error object from a node is final and is not retried elsewhere.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        let started = Instant::now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            let fut = self.http.post(endpoint.clone()).json(&body).send();
            let response = match timeout(self.timeout_duration, fut).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    tracing::warn!(provider_idx = i, method, error = %e, "RPC error, trying next provider");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, method, "RPC timeout, trying next provider");
                    continue;
                }
            };

            if response.status().is_server_error() {
                tracing::warn!(provider_idx = i, method, status = %response.status(), "RPC server error, trying next provider");
                continue;
            }

            let envelope: RpcResponse = match response.json().await {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(provider_idx = i, method, error = %e, "Unreadable RPC response, trying next provider");
                    continue;
                }
            };

            metrics::record_rpc_call(method, started);

            if let Some(err) = envelope.error {
                return Err(ChainError::Rejected {
                    method: method.to_string(),
                    message: format!("{} (code {})", err.message, err.code),
                });
            }

            let result = envelope.result.unwrap_or(Value::Null);
            return serde_json::from_value(result)
                .map_err(|e| ChainError::Decode(format!("{}: {}", method, e)));
        }

        metrics::record_rpc_call(method, started);
        Err(ChainError::Rpc(format!("All RPC providers failed for {}", method)))
    }

    /// Get the configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn unspent_outputs(&self, address: Address) -> ChainResult<Vec<UnspentOutput>> {
        self.call("plasma_unspent", json!([address])).await
    }

    async fn send_raw_transaction(&self, signed_tx_hex: &str) -> ChainResult<String> {
        self.call("eth_sendRawTransaction", json!([signed_tx_hex])).await
    }
}

impl std::fmt::Debug for RpcChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChainClient")
            .field("rpc_url", &self.config.rpc_url)
            .field("endpoints", &self.endpoints.len())
            .field("timeout_secs", &self.config.rpc_timeout_secs)
            .finish()
    }
}
