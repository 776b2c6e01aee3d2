//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{keccak256, Address, Bytes, U256};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use envelope_dispenser::blockchain::{
    color_balance, AccountDeriver, ChainClient, ChainError, ChainResult, Color, DecodedPayout, Outpoint, TxOutput,
    UnspentOutput,
};
use envelope_dispenser::config::DispenserConfig;
use envelope_dispenser::envelope::store::{ClaimUpdate, EnvelopeStore, StoreResult, Versioned};
use envelope_dispenser::envelope::{EnvelopeRecord, StoreError};
use envelope_dispenser::lifecycle::startup::{build_services, Services};

pub const MNEMONIC: &str = "unable drop gospel simple danger elbow brand head shrug cereal lens grain";
pub const FUNDER: &str = "0xaabeac30c498d9e26865f34fcaa57dbb935b0daa";

/// A distinct, well-formed claimant address for each `n`.
pub fn claimant(n: u64) -> String {
    format!("0x{:040x}", 0xc1a1_0000_u64 + n)
}

pub fn parse(address: &str) -> Address {
    address.parse().unwrap()
}

pub fn e18() -> U256 {
    U256::from(10).pow(U256::from(18))
}

pub fn deriver() -> AccountDeriver {
    AccountDeriver::from_mnemonic(MNEMONIC).unwrap()
}

/// Defaults with millisecond backoff so retry paths run fast.
pub fn test_config() -> DispenserConfig {
    let mut config = DispenserConfig::default();
    config.retries.max_attempts = 3;
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 5;
    config.dispatcher.poll_interval_ms = 10;
    config
}

/// In-memory ledger standing in for the RPC node.
///
/// Broadcasts are decoded and applied: spent outpoints disappear and the new
/// outputs become spendable, so sequential payouts see each other's change.
/// Spending an outpoint that no longer exists is rejected like a double spend.
#[derive(Default)]
pub struct StubChain {
    ledger: Mutex<Vec<UnspentOutput>>,
    broadcasts: Mutex<Vec<String>>,
    next_outpoint: AtomicU64,
    fail_unspent: AtomicU32,
    fail_broadcast: AtomicU32,
    latency_ms: AtomicU64,
    unspent_calls: Mutex<HashMap<Address, u32>>,
}

impl StubChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Credit `owner` with a fresh output.
    pub fn fund(&self, owner: Address, value: U256, color: Color) {
        let outpoint = self.next_outpoint.fetch_add(1, Ordering::SeqCst);
        self.ledger.lock().unwrap().push(UnspentOutput {
            outpoint: Outpoint(Bytes::from(outpoint.to_be_bytes().to_vec())),
            output: TxOutput::new(owner, value, color),
        });
    }

    pub fn balance(&self, owner: Address, color: Color) -> U256 {
        color_balance(&self.owned_by(owner), color)
    }

    pub fn broadcasts(&self) -> Vec<DecodedPayout> {
        self.broadcasts
            .lock()
            .unwrap()
            .iter()
            .map(|raw| DecodedPayout::from_hex(raw).unwrap())
            .collect()
    }

    /// Fail the next `n` unspent queries with a connectivity error.
    pub fn fail_unspent(&self, n: u32) {
        self.fail_unspent.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` broadcasts with a connectivity error.
    pub fn fail_broadcast(&self, n: u32) {
        self.fail_broadcast.store(n, Ordering::SeqCst);
    }

    /// Delay every unspent query, widening race windows.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn unspent_calls(&self, owner: Address) -> u32 {
        self.unspent_calls.lock().unwrap().get(&owner).copied().unwrap_or(0)
    }

    fn owned_by(&self, owner: Address) -> Vec<UnspentOutput> {
        self.ledger
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.output.address == owner)
            .cloned()
            .collect()
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChainClient for StubChain {
    async fn unspent_outputs(&self, address: Address) -> ChainResult<Vec<UnspentOutput>> {
        *self.unspent_calls.lock().unwrap().entry(address).or_default() += 1;

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if Self::take_failure(&self.fail_unspent) {
            return Err(ChainError::Rpc("connection refused".to_string()));
        }
        Ok(self.owned_by(address))
    }

    async fn send_raw_transaction(&self, signed_tx_hex: &str) -> ChainResult<String> {
        if Self::take_failure(&self.fail_broadcast) {
            return Err(ChainError::Timeout(1));
        }

        let tx = DecodedPayout::from_hex(signed_tx_hex).map_err(|e| ChainError::Rejected {
            method: "eth_sendRawTransaction".to_string(),
            message: e.to_string(),
        })?;

        let mut ledger = self.ledger.lock().unwrap();
        for spent in &tx.spent {
            if !ledger.iter().any(|u| &u.outpoint == spent) {
                return Err(ChainError::Rejected {
                    method: "eth_sendRawTransaction".to_string(),
                    message: "input already spent".to_string(),
                });
            }
        }
        ledger.retain(|u| !tx.spent.contains(&u.outpoint));
        for output in tx.outputs {
            let outpoint = self.next_outpoint.fetch_add(1, Ordering::SeqCst);
            ledger.push(UnspentOutput {
                outpoint: Outpoint(Bytes::from(outpoint.to_be_bytes().to_vec())),
                output,
            });
        }

        self.broadcasts.lock().unwrap().push(signed_tx_hex.to_string());
        Ok(alloy::hex::encode_prefixed(keccak256(signed_tx_hex.as_bytes())))
    }
}

/// Store wrapper that fails the next `n` reads with `Unavailable`.
pub struct FlakyStore<S> {
    pub inner: S,
    fail_gets: AtomicU32,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S, fail_gets: u32) -> Self {
        Self {
            inner,
            fail_gets: AtomicU32::new(fail_gets),
        }
    }
}

#[async_trait]
impl<S: EnvelopeStore> EnvelopeStore for FlakyStore<S> {
    async fn count(&self) -> StoreResult<u64> {
        self.inner.count().await
    }

    async fn insert_new(&self, record: EnvelopeRecord) -> StoreResult<()> {
        self.inner.insert_new(record).await
    }

    async fn get(&self, address: &str) -> StoreResult<Option<Versioned<EnvelopeRecord>>> {
        if StubChain::take_failure(&self.fail_gets) {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.get(address).await
    }

    async fn update_claim(&self, address: &str, expected_version: u64, update: ClaimUpdate) -> StoreResult<u64> {
        self.inner.update_claim(address, expected_version, update).await
    }
}

/// Services wired around `chain`, as the binary wires them.
pub fn services(config: &DispenserConfig, chain: Arc<StubChain>) -> Services {
    build_services(config, deriver(), chain)
}

/// Start a JSON-RPC node answering each request body with `f`'s `(status, body)`.
pub async fn start_rpc_node<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(request) = read_json_body(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read one HTTP request and parse its body as JSON.
async fn read_json_body(socket: &mut tokio::net::TcpStream) -> Option<Value> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        let body_start = header_end + 4;
        if buf.len() >= body_start + length {
            return serde_json::from_slice(&buf[body_start..body_start + length]).ok();
        }
    }
}
