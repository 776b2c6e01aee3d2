//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispenser.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the envelope dispenser.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispenserConfig {
    /// Listener configuration for the HTTP surface.
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Chain RPC settings.
    pub chain: ChainConfig,

    /// Retry configuration for transient infrastructure failures.
    pub retries: RetryConfig,

    /// Envelope claim settings.
    pub envelope: EnvelopeConfig,

    /// Payout dispatcher settings.
    pub dispatcher: DispatcherConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Chain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs, tried in order.
    pub failover_urls: Vec<String>,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            rpc_timeout_secs: 10,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Envelope claim configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Extra full re-runs of a claim after an optimistic-update conflict.
    pub claim_conflict_retries: u32,

    /// How many consecutive indices a create may probe before giving up.
    pub max_index_probes: u32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            claim_conflict_retries: 1,
            max_index_probes: 64,
        }
    }
}

/// Payout dispatcher configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Enable the background dispatcher loop.
    pub enabled: bool,

    /// Maximum deliveries drained per tick.
    pub batch_size: usize,

    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,

    /// Maximum number of paying accounts processed concurrently.
    pub max_concurrency: usize,

    /// Deliveries after which a transiently failing message is dead-lettered.
    pub max_deliveries: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            poll_interval_ms: 1000,
            max_concurrency: 4,
            max_deliveries: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispenserConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.retries.max_attempts, 3);
        assert_eq!(config.envelope.claim_conflict_retries, 1);
        assert_eq!(config.dispatcher.batch_size, 10);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: DispenserConfig = toml::from_str(
            r#"
            [chain]
            rpc_url = "http://node:8645"

            [dispatcher]
            batch_size = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.chain.rpc_url, "http://node:8645");
        assert_eq!(config.chain.rpc_timeout_secs, 10);
        assert_eq!(config.dispatcher.batch_size, 25);
        assert_eq!(config.dispatcher.max_concurrency, 4);
    }
}
