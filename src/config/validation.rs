//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, batch sizes > 0)
//! - Check that addresses and URLs parse

use std::net::SocketAddr;

use crate::config::schema::DispenserConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem rather than stopping at the first.
pub fn validate_config(config: &DispenserConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.chain.rpc_url.parse::<url::Url>().is_err() {
        errors.push(ValidationError::new(
            "chain.rpc_url",
            format!("not a URL: {}", config.chain.rpc_url),
        ));
    }
    for url in &config.chain.failover_urls {
        if url.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(
                "chain.failover_urls",
                format!("not a URL: {}", url),
            ));
        }
    }
    if config.chain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("chain.rpc_timeout_secs", "must be > 0"));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.envelope.max_index_probes == 0 {
        errors.push(ValidationError::new("envelope.max_index_probes", "must be >= 1"));
    }

    if config.dispatcher.batch_size == 0 {
        errors.push(ValidationError::new("dispatcher.batch_size", "must be > 0"));
    }
    if config.dispatcher.max_concurrency == 0 {
        errors.push(ValidationError::new("dispatcher.max_concurrency", "must be > 0"));
    }
    if config.dispatcher.poll_interval_ms == 0 {
        errors.push(ValidationError::new("dispatcher.poll_interval_ms", "must be > 0"));
    }
    if config.dispatcher.max_deliveries == 0 {
        errors.push(ValidationError::new("dispatcher.max_deliveries", "must be > 0"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
