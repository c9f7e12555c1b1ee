//! RPC endpoint pool and bounded-wait chain access.
//!
//! All blockchain reads go through the `ChainClient` trait so the scan loops
//! can run against a mock in tests. The production implementation wraps an
//! alloy HTTP provider and time-boxes every call; a call that overruns its
//! box is a connectivity fault, which triggers endpoint failover upstream.

use crate::config::{ChainConfig, EndpointConfig};
use crate::errors::{ChainError, MonitorError};

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{BlockNumberOrTag, TransactionRequest};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A candidate JSON-RPC endpoint. Lower priority values are tried first.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: String,
    pub priority: u32,
}

/// A block with its full transaction list, reduced to the fields the
/// scanners consume.
#[derive(Debug, Clone)]
pub struct ChainBlock {
    pub number: u64,
    pub timestamp: u64,
    pub transactions: Vec<ChainTx>,
}

#[derive(Debug, Clone)]
pub struct ChainTx {
    pub hash: B256,
    pub to: Option<Address>,
    pub input: Bytes,
}

#[derive(Debug, Clone)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct ChainReceipt {
    pub tx_hash: B256,
    pub logs: Vec<ChainLog>,
}

/// Read-only chain access, one method per RPC call the monitor makes.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;
    async fn block_with_txs(&self, number: u64) -> Result<Option<ChainBlock>, ChainError>;
    async fn receipt(&self, tx_hash: B256) -> Result<Option<ChainReceipt>, ChainError>;
    /// eth_call against `to` with raw calldata.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;
}

/// An established connection handed to the monitor controller.
pub struct Connection {
    pub endpoint_index: usize,
    pub endpoint_url: String,
    pub client: Arc<dyn ChainClient>,
    /// Height observed by the connect-time probe.
    pub height: u64,
}

/// Produces a live connection, failing over across candidates. Mocked in
/// controller tests.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, MonitorError>;
}

// ─── Endpoint pool ───────────────────────────────────────────────────────────

/// Ordered candidate endpoints; `connect` walks them in priority order and
/// returns the first that answers a height probe inside the time box.
pub struct EndpointPool {
    endpoints: Vec<RpcEndpoint>,
    request_timeout: Duration,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<RpcEndpoint>, request_timeout: Duration) -> Self {
        let mut endpoints = endpoints;
        endpoints.sort_by_key(|e| e.priority);
        Self {
            endpoints,
            request_timeout,
        }
    }

    pub fn from_config(config: &ChainConfig) -> Self {
        let endpoints = config
            .endpoints
            .iter()
            .map(|e: &EndpointConfig| RpcEndpoint {
                url: e.url.clone(),
                priority: e.priority,
            })
            .collect();
        Self::new(endpoints, Duration::from_secs(config.request_timeout_secs))
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }
}

#[async_trait]
impl Connector for EndpointPool {
    async fn connect(&self) -> Result<Connection, MonitorError> {
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            info!(url = %endpoint.url, candidate = index + 1, total = self.endpoints.len(), "trying rpc endpoint");

            let client = match HttpChainClient::connect(&endpoint.url, self.request_timeout) {
                Ok(c) => c,
                Err(e) => {
                    warn!(url = %endpoint.url, error = %e, "endpoint rejected");
                    continue;
                }
            };

            match client.block_number().await {
                Ok(height) => {
                    info!(url = %endpoint.url, block = height, "rpc endpoint connected");
                    return Ok(Connection {
                        endpoint_index: index,
                        endpoint_url: endpoint.url.clone(),
                        client: Arc::new(client),
                        height,
                    });
                }
                Err(e) => {
                    warn!(url = %endpoint.url, error = %e, "endpoint probe failed");
                }
            }
        }

        Err(MonitorError::EndpointsExhausted)
    }
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

/// Alloy-backed HTTP client with a fixed per-call time box.
pub struct HttpChainClient {
    provider: DynProvider,
    timeout: Duration,
}

impl HttpChainClient {
    pub fn connect(url: &str, timeout: Duration) -> Result<Self, ChainError> {
        let parsed = url
            .parse()
            .map_err(|e| ChainError::Connect(format!("invalid url {url}: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(parsed).erased();
        Ok(Self { provider, timeout })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, ChainError>
    where
        F: Future<Output = Result<T, ChainError>> + Send,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ChainError::Timeout(self.timeout))?
    }
}

/// Sort a provider error into the connectivity vs request-level bucket by
/// inspecting the message; alloy flattens transport failures into the same
/// error type as JSON-RPC responses.
fn classify_provider_error(e: impl std::fmt::Display) -> ChainError {
    let msg = e.to_string();
    let lowered = msg.to_lowercase();
    let transport = lowered.contains("connect")
        || lowered.contains("connection")
        || lowered.contains("dns")
        || lowered.contains("timed out")
        || lowered.contains("transport")
        || lowered.contains("429")
        || lowered.contains("too many requests");
    if transport {
        ChainError::Connect(msg)
    } else {
        ChainError::Rpc(msg)
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.bounded(async {
            self.provider
                .get_block_number()
                .await
                .map_err(classify_provider_error)
        })
        .await
    }

    async fn block_with_txs(&self, number: u64) -> Result<Option<ChainBlock>, ChainError> {
        self.bounded(async {
            let block = self
                .provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .full()
                .await
                .map_err(classify_provider_error)?;

            let Some(block) = block else {
                debug!(block = number, "block not yet available");
                return Ok(None);
            };

            let transactions = block
                .transactions
                .into_transactions()
                .map(|tx| ChainTx {
                    hash: alloy::network::TransactionResponse::tx_hash(&tx),
                    to: alloy::consensus::Transaction::to(&tx),
                    input: alloy::consensus::Transaction::input(&tx).clone(),
                })
                .collect();

            Ok(Some(ChainBlock {
                number: block.header.number,
                timestamp: block.header.timestamp,
                transactions,
            }))
        })
        .await
    }

    async fn receipt(&self, tx_hash: B256) -> Result<Option<ChainReceipt>, ChainError> {
        self.bounded(async {
            let receipt = self
                .provider
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(classify_provider_error)?;

            Ok(receipt.map(|r| {
                use alloy::consensus::TxReceipt;
                let logs = r
                    .inner
                    .logs()
                    .iter()
                    .map(|log| ChainLog {
                        address: log.address(),
                        topics: log.topics().to_vec(),
                        data: log.data().data.clone(),
                    })
                    .collect();
                ChainReceipt { tx_hash, logs }
            }))
        })
        .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.bounded(async {
            let tx = TransactionRequest::default().with_to(to).with_input(data);
            self.provider
                .call(tx)
                .await
                .map_err(classify_provider_error)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_orders_by_priority() {
        let pool = EndpointPool::new(
            vec![
                RpcEndpoint { url: "https://b".into(), priority: 2 },
                RpcEndpoint { url: "https://a".into(), priority: 1 },
            ],
            Duration::from_secs(5),
        );
        assert_eq!(pool.endpoints[0].url, "https://a");
        assert_eq!(pool.endpoints[1].url, "https://b");
    }

    #[test]
    fn test_error_classification() {
        assert!(classify_provider_error("error sending request: connection refused")
            .is_connectivity());
        assert!(classify_provider_error("429 Too Many Requests").is_connectivity());
        assert!(!classify_provider_error("execution reverted").is_connectivity());
    }
}
