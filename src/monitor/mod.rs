//! Monitor controller.
//!
//! Owns the two scan streams (asset creation, whale transfers), the block
//! cursors, and the connection lifecycle:
//!
//!   Stopped → Initializing → Connected → Running ⇄ Reconnecting → Running
//!
//! Each stream runs on a fixed-period tick. Within a tick the unscanned
//! range (cursor, height] is processed sequentially, and the cursor only
//! advances when the entire range completed without a connectivity fault —
//! partial success never silently skips blocks. A connectivity fault
//! triggers failover (re-initialize) before the next tick. Stop is
//! cooperative: the flag is checked before the next tick, in-flight work is
//! never interrupted.

pub mod types;

use crate::alert::SubscriberCache;
use crate::chain::{ChainClient, Connector};
use crate::config::MonitorConfig;
use crate::decode::{scale_amount, AssetCreationEvent, EventDecoder, MetadataResolver, TransferEvent};
use crate::errors::{ChainError, MonitorError};
use crate::registry::AssetRegistry;
use crate::store::{AssetRecord, Store, WhaleTransactionRecord};
use crate::whale::WhaleClassifier;

use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use types::MonitorEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Stopped,
    Initializing,
    Connected,
    Running,
    Reconnecting,
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Stopped => write!(f, "stopped"),
            MonitorStatus::Initializing => write!(f, "initializing"),
            MonitorStatus::Connected => write!(f, "connected"),
            MonitorStatus::Running => write!(f, "running"),
            MonitorStatus::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Connection state, written only by the controller.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: MonitorStatus,
    pub endpoint_index: Option<usize>,
    pub endpoint_url: Option<String>,
    pub last_height: u64,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            status: MonitorStatus::Stopped,
            endpoint_index: None,
            endpoint_url: None,
            last_height: 0,
        }
    }
}

/// Snapshot for the command layer's status surface.
#[derive(Debug, Clone)]
pub struct MonitoringStats {
    pub running: bool,
    pub status: MonitorStatus,
    pub monitored_tokens: usize,
    pub last_asset_block: u64,
    pub last_whale_block: u64,
    pub endpoint: Option<String>,
    pub mode: String,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub scan_interval: Duration,
    pub refresh_interval: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            refresh_interval: Duration::from_secs(config.registry_refresh_secs),
        }
    }
}

pub struct MonitorController {
    connector: Arc<dyn Connector>,
    client: tokio::sync::RwLock<Option<Arc<dyn ChainClient>>>,
    state: std::sync::RwLock<ConnectionState>,
    running: AtomicBool,
    decoder: EventDecoder,
    metadata: MetadataResolver,
    registry: Arc<AssetRegistry>,
    classifier: tokio::sync::Mutex<WhaleClassifier>,
    subscribers: Arc<SubscriberCache>,
    store: Arc<dyn Store>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    asset_cursor: AtomicU64,
    whale_cursor: AtomicU64,
    settings: MonitorSettings,
}

impl MonitorController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connector: Arc<dyn Connector>,
        decoder: EventDecoder,
        registry: Arc<AssetRegistry>,
        classifier: WhaleClassifier,
        subscribers: Arc<SubscriberCache>,
        store: Arc<dyn Store>,
        events: mpsc::UnboundedSender<MonitorEvent>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            connector,
            client: tokio::sync::RwLock::new(None),
            state: std::sync::RwLock::new(ConnectionState::default()),
            running: AtomicBool::new(false),
            decoder,
            metadata: MetadataResolver::new(),
            registry,
            classifier: tokio::sync::Mutex::new(classifier),
            subscribers,
            store,
            events,
            asset_cursor: AtomicU64::new(0),
            whale_cursor: AtomicU64::new(0),
            settings,
        }
    }

    /// Try the endpoints in priority order; the first that answers a height
    /// probe becomes active. On success the cursors start at the observed
    /// height (only on the first initialize — failover keeps them).
    pub async fn initialize(&self) -> Result<(), MonitorError> {
        self.set_status(MonitorStatus::Initializing);

        match self.connector.connect().await {
            Ok(conn) => {
                let _ = self.asset_cursor.compare_exchange(
                    0,
                    conn.height,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                let _ = self.whale_cursor.compare_exchange(
                    0,
                    conn.height,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );

                {
                    let mut state = self.state.write().unwrap();
                    state.status = if self.running.load(Ordering::SeqCst) {
                        MonitorStatus::Running
                    } else {
                        MonitorStatus::Connected
                    };
                    state.endpoint_index = Some(conn.endpoint_index);
                    state.endpoint_url = Some(conn.endpoint_url.clone());
                    state.last_height = conn.height;
                }
                *self.client.write().await = Some(conn.client);

                let _ = self.events.send(MonitorEvent::Connected {
                    endpoint: conn.endpoint_url,
                });
                Ok(())
            }
            Err(e) => {
                *self.client.write().await = None;
                // During a running reconnect we keep retrying on the tick
                // schedule; at first start, exhausted endpoints disable the
                // monitor until initialize is called again.
                let status = if self.running.load(Ordering::SeqCst) {
                    MonitorStatus::Reconnecting
                } else {
                    MonitorStatus::Stopped
                };
                self.set_status(status);
                Err(e)
            }
        }
    }

    /// Spawn the scan and cache-refresh loops. Call `initialize` first.
    pub fn start(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>, MonitorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }
        self.set_status(MonitorStatus::Running);
        info!(
            interval_secs = self.settings.scan_interval.as_secs(),
            "starting asset and whale scan loops"
        );

        let mut handles = Vec::new();

        let controller = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.settings.scan_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !controller.running.load(Ordering::SeqCst) {
                    break;
                }
                controller.asset_tick().await;
            }
            debug!("asset scan loop stopped");
        }));

        let controller = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.settings.scan_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !controller.running.load(Ordering::SeqCst) {
                    break;
                }
                controller.whale_tick().await;
            }
            debug!("whale scan loop stopped");
        }));

        let controller = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(controller.settings.refresh_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !controller.running.load(Ordering::SeqCst) {
                    break;
                }
                controller.refresh_caches().await;
            }
            debug!("cache refresh loop stopped");
        }));

        Ok(handles)
    }

    /// Cooperative stop: takes effect before the next tick; in-flight work
    /// finishes.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.set_status(MonitorStatus::Stopped);
            info!("monitor stop requested; loops exit before their next tick");
        }
    }

    pub fn stats(&self) -> MonitoringStats {
        let state = self.state.read().unwrap().clone();
        let mode = if state.endpoint_url.is_some() {
            "rpc".to_string()
        } else {
            "disabled".to_string()
        };
        MonitoringStats {
            running: self.running.load(Ordering::SeqCst),
            status: state.status,
            monitored_tokens: self.registry.len(),
            last_asset_block: self.asset_cursor.load(Ordering::SeqCst),
            last_whale_block: self.whale_cursor.load(Ordering::SeqCst),
            endpoint: state.endpoint_url,
            mode,
        }
    }

    // Command-layer passthroughs.

    pub async fn recent_assets(&self, hours: u64) -> anyhow::Result<Vec<AssetRecord>> {
        self.store.recent_assets(hours).await
    }

    pub async fn recent_whale_transactions(
        &self,
        hours: u64,
    ) -> anyhow::Result<Vec<WhaleTransactionRecord>> {
        self.store.recent_whale_transactions(hours).await
    }

    /// Launch-pattern analysis for one token over stored whale history.
    pub async fn token_analysis(
        &self,
        token_address: &str,
        hours: u64,
    ) -> anyhow::Result<Option<crate::analysis::TokenAnalysis>> {
        let mut records: Vec<WhaleTransactionRecord> = self
            .store
            .recent_whale_transactions(hours)
            .await?
            .into_iter()
            .filter(|t| t.token_address.eq_ignore_ascii_case(token_address))
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(crate::analysis::analyze_token(&records))
    }

    pub async fn subscriber_threshold(&self, user_id: i64) -> anyhow::Result<f64> {
        self.store.subscriber_threshold(user_id).await
    }

    pub async fn set_subscriber_threshold(
        &self,
        user_id: i64,
        threshold: f64,
    ) -> anyhow::Result<()> {
        self.store.set_subscriber_threshold(user_id, threshold).await?;
        // Keep the cached minimum in step with the change.
        self.subscribers.refresh(self.store.as_ref()).await?;
        Ok(())
    }

    // ─── Internals ───────────────────────────────────────────────────────────

    fn set_status(&self, status: MonitorStatus) {
        self.state.write().unwrap().status = status;
    }

    async fn current_client(&self) -> Option<Arc<dyn ChainClient>> {
        self.client.read().await.clone()
    }

    /// React to a chain fault inside a tick. Connectivity faults drop the
    /// client and re-run initialize so the next tick starts on a fresh
    /// endpoint; anything else is logged and retried by virtue of the
    /// cursor not having advanced.
    async fn handle_chain_error(&self, context: &str, error: ChainError) {
        if error.is_connectivity() {
            warn!(context = context, error = %error, "connectivity fault, failing over");
            let _ = self.events.send(MonitorEvent::Disconnected {
                reason: error.to_string(),
            });
            self.set_status(MonitorStatus::Reconnecting);
            *self.client.write().await = None;
            if let Err(e) = self.initialize().await {
                warn!(error = %e, "re-initialize failed; will retry next tick");
            }
        } else {
            warn!(context = context, error = %error, "rpc fault, range will be rescanned");
        }
    }

    async fn refresh_caches(&self) {
        if let Err(e) = self.registry.refresh(self.store.as_ref()).await {
            warn!(error = %e, "freshness registry refresh failed");
        }
        if let Err(e) = self.subscribers.refresh(self.store.as_ref()).await {
            warn!(error = %e, "subscriber cache refresh failed");
        }
    }

    async fn asset_tick(&self) {
        let Some(client) = self.current_client().await else {
            self.handle_chain_error("asset tick", ChainError::Connect("no active connection".into()))
                .await;
            return;
        };

        let height = match client.block_number().await {
            Ok(h) => h,
            Err(e) => {
                self.handle_chain_error("asset height poll", e).await;
                return;
            }
        };
        self.state.write().unwrap().last_height = height;

        let cursor = self.asset_cursor.load(Ordering::SeqCst);
        if height <= cursor {
            return;
        }

        debug!(from = cursor + 1, to = height, "scanning range for asset creations");
        for number in cursor + 1..=height {
            if let Err(e) = self.scan_block_for_assets(client.as_ref(), number).await {
                self.handle_chain_error("asset block scan", e).await;
                return;
            }
        }
        self.asset_cursor.store(height, Ordering::SeqCst);
    }

    async fn whale_tick(&self) {
        let Some(client) = self.current_client().await else {
            self.handle_chain_error("whale tick", ChainError::Connect("no active connection".into()))
                .await;
            return;
        };

        let height = match client.block_number().await {
            Ok(h) => h,
            Err(e) => {
                self.handle_chain_error("whale height poll", e).await;
                return;
            }
        };
        self.state.write().unwrap().last_height = height;

        let cursor = self.whale_cursor.load(Ordering::SeqCst);
        if height <= cursor {
            return;
        }

        debug!(from = cursor + 1, to = height, "scanning range for whale transfers");
        for number in cursor + 1..=height {
            if let Err(e) = self.scan_block_for_whales(client.as_ref(), number).await {
                self.handle_chain_error("whale block scan", e).await;
                return;
            }
        }
        self.whale_cursor.store(height, Ordering::SeqCst);
    }

    async fn scan_block_for_assets(
        &self,
        client: &dyn ChainClient,
        number: u64,
    ) -> Result<(), ChainError> {
        let Some(block) = client.block_with_txs(number).await? else {
            debug!(block = number, "block unavailable, skipping");
            return Ok(());
        };

        for tx in &block.transactions {
            if !self.decoder.is_creation_candidate(tx) {
                continue;
            }
            let Some(receipt) = client.receipt(tx.hash).await? else {
                continue;
            };
            let Some(event) = self
                .decoder
                .decode_creation(&receipt, block.number, block.timestamp)
            else {
                continue;
            };
            self.process_creation(event).await;
        }
        Ok(())
    }

    async fn scan_block_for_whales(
        &self,
        client: &dyn ChainClient,
        number: u64,
    ) -> Result<(), ChainError> {
        let Some(block) = client.block_with_txs(number).await? else {
            debug!(block = number, "block unavailable, skipping");
            return Ok(());
        };

        for tx in &block.transactions {
            let Some(receipt) = client.receipt(tx.hash).await? else {
                continue;
            };
            for log in &receipt.logs {
                let Some(transfer) =
                    self.decoder
                        .decode_transfer(log, tx.hash, block.number, block.timestamp)
                else {
                    continue;
                };
                self.process_transfer(client, transfer).await;
            }
        }
        Ok(())
    }

    /// Dedup by address, persist, warm the registry, emit.
    async fn process_creation(&self, event: AssetCreationEvent) {
        let address = format!("{:#x}", event.address);

        match self.store.get_asset(&address).await {
            Ok(Some(_)) => {
                debug!(address = %address, "asset already recorded, skipping");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(address = %address, error = %e, "asset dedup check failed, treating as new");
            }
        }

        let record = AssetRecord {
            address: address.clone(),
            name: event.name.clone(),
            creator: format!("{:#x}", event.creator),
            initial_supply: event.initial_supply,
            created_at: event.created_at,
            tx_hash: format!("{:#x}", event.tx_hash),
            block_number: event.block_number,
            first_seen: Utc::now(),
        };

        if let Err(e) = self.store.save_asset(&record).await {
            warn!(address = %address, error = %e, "asset persist failed, alerting anyway");
        }

        // Warm the freshness registry immediately rather than waiting for
        // the next wholesale refresh.
        self.registry.insert(event.address, event.created_at);

        info!(name = %record.name, address = %record.address, block = record.block_number, "new asset detected");
        let _ = self.events.send(MonitorEvent::AssetCreated(record));
    }

    /// Resolve metadata, classify, persist and emit on a positive verdict.
    async fn process_transfer(&self, client: &dyn ChainClient, transfer: TransferEvent) {
        let metadata = self.metadata.resolve(client, transfer.token_address).await;
        let amount = scale_amount(transfer.amount_raw, metadata.decimals);
        let min_threshold = self.subscribers.min_threshold();

        let (verdict, category) = {
            let mut classifier = self.classifier.lock().await;
            let verdict = classifier.classify(&transfer, amount, min_threshold).await;
            let category = classifier.categorize(transfer.from, transfer.to);
            (verdict, category)
        };
        let Some(verdict) = verdict else {
            return;
        };

        let record = WhaleTransactionRecord {
            tx_hash: format!("{:#x}", transfer.tx_hash),
            from: format!("{:#x}", transfer.from),
            to: format!("{:#x}", transfer.to),
            token_address: format!("{:#x}", transfer.token_address),
            token_name: metadata.name,
            token_symbol: metadata.symbol,
            amount,
            category,
            timestamp: transfer.timestamp,
            block_number: transfer.block_number,
            is_fresh_token: self.registry.is_fresh(transfer.token_address, transfer.timestamp),
            token_age: self.registry.age(transfer.token_address, transfer.timestamp),
            reason: verdict.reason.clone(),
        };

        info!(
            amount = amount,
            symbol = %record.token_symbol,
            tx = %record.tx_hash,
            reason = %record.reason,
            "whale activity detected"
        );

        if let Err(e) = self.store.save_whale_transaction(&record).await {
            warn!(tx = %record.tx_hash, error = %e, "whale persist failed, alerting anyway");
        }

        let _ = self.events.send(MonitorEvent::WhaleDetected { record, verdict });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainBlock, ChainLog, ChainReceipt, ChainTx, Connection};
    use crate::config::{DecodeConfig, WhaleConfig, WindowConfig};
    use crate::decode::{keccak256, TRANSFER_TOPIC};
    use crate::store::MemoryStore;
    use alloy::primitives::{address, Address, Bytes, B256, U256};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockChain {
        height: AtomicU64,
        blocks: Mutex<HashMap<u64, ChainBlock>>,
        receipts: Mutex<HashMap<B256, ChainReceipt>>,
        visited: Mutex<Vec<u64>>,
        fail_block: Mutex<Option<u64>>,
    }

    impl MockChain {
        fn new(height: u64) -> Self {
            Self {
                height: AtomicU64::new(height),
                blocks: Mutex::new(HashMap::new()),
                receipts: Mutex::new(HashMap::new()),
                visited: Mutex::new(Vec::new()),
                fail_block: Mutex::new(None),
            }
        }

        fn set_height(&self, height: u64) {
            self.height.store(height, Ordering::SeqCst);
        }

        fn add_block(&self, block: ChainBlock) {
            self.blocks.lock().unwrap().insert(block.number, block);
        }

        fn add_receipt(&self, receipt: ChainReceipt) {
            self.receipts.lock().unwrap().insert(receipt.tx_hash, receipt);
        }

        fn fail_at(&self, block: Option<u64>) {
            *self.fail_block.lock().unwrap() = block;
        }

        fn visited(&self) -> Vec<u64> {
            self.visited.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainClient for MockChain {
        async fn block_number(&self) -> Result<u64, ChainError> {
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn block_with_txs(&self, number: u64) -> Result<Option<ChainBlock>, ChainError> {
            if *self.fail_block.lock().unwrap() == Some(number) {
                return Err(ChainError::Timeout(Duration::from_secs(5)));
            }
            self.visited.lock().unwrap().push(number);
            Ok(self.blocks.lock().unwrap().get(&number).cloned().or(Some(ChainBlock {
                number,
                timestamp: 1_700_000_000,
                transactions: Vec::new(),
            })))
        }

        async fn receipt(&self, tx_hash: B256) -> Result<Option<ChainReceipt>, ChainError> {
            Ok(self.receipts.lock().unwrap().get(&tx_hash).cloned())
        }

        async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, ChainError> {
            // No metadata available — sentinels all the way.
            Err(ChainError::Rpc("no metadata".into()))
        }
    }

    struct MockConnector {
        chain: Arc<MockChain>,
        fail: Mutex<bool>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<Connection, MonitorError> {
            if *self.fail.lock().unwrap() {
                return Err(MonitorError::EndpointsExhausted);
            }
            let height = self.chain.block_number().await?;
            Ok(Connection {
                endpoint_index: 0,
                endpoint_url: "mock://rpc".to_string(),
                client: self.chain.clone(),
                height,
            })
        }
    }

    const REGISTRY_CONTRACT: Address = address!("00000000000000000000000000000000000000aa");

    fn controller(
        chain: Arc<MockChain>,
        store: Arc<MemoryStore>,
    ) -> (Arc<MonitorController>, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(AssetRegistry::new(4));
        let decoder = EventDecoder::new(&DecodeConfig {
            registry_contracts: vec![format!("{:#x}", REGISTRY_CONTRACT)],
            creation_selectors: Vec::new(),
            creation_event: "IPAssetRegistered(address,address,string,uint256)".to_string(),
        });
        let whale_config = WhaleConfig {
            windows: vec![WindowConfig { duration_secs: 30, volume_threshold: 100.0 }],
            ..WhaleConfig::default()
        };
        let classifier = WhaleClassifier::new(&whale_config, registry.clone(), None);
        let connector = Arc::new(MockConnector { chain, fail: Mutex::new(false) });
        let controller = Arc::new(MonitorController::new(
            connector,
            decoder,
            registry,
            classifier,
            Arc::new(SubscriberCache::new()),
            store,
            tx,
            MonitorSettings {
                scan_interval: Duration::from_millis(10),
                refresh_interval: Duration::from_millis(10),
            },
        ));
        (controller, rx)
    }

    fn transfer_block(number: u64, amount_tokens: u64) -> (ChainBlock, ChainReceipt) {
        let tx_hash = B256::repeat_byte(number as u8);
        let block = ChainBlock {
            number,
            timestamp: Utc::now().timestamp() as u64,
            transactions: vec![ChainTx { hash: tx_hash, to: None, input: Bytes::new() }],
        };
        // 18 sentinel decimals: amount_tokens × 10^18 raw.
        let raw = U256::from(amount_tokens) * U256::from(10u64).pow(U256::from(18u64));
        let receipt = ChainReceipt {
            tx_hash,
            logs: vec![ChainLog {
                address: address!("1111111111111111111111111111111111111111"),
                topics: vec![
                    TRANSFER_TOPIC,
                    address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").into_word(),
                    address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb").into_word(),
                ],
                data: raw.to_be_bytes::<32>().to_vec().into(),
            }],
        };
        (block, receipt)
    }

    fn creation_block(number: u64, asset: Address) -> (ChainBlock, ChainReceipt) {
        let tx_hash = B256::repeat_byte(0xc0 ^ number as u8);
        let block = ChainBlock {
            number,
            timestamp: Utc::now().timestamp() as u64,
            transactions: vec![ChainTx {
                hash: tx_hash,
                to: Some(REGISTRY_CONTRACT),
                input: Bytes::new(),
            }],
        };
        let name = "Creative Commons Work";
        let mut data = Vec::new();
        data.extend_from_slice(&U256::from(64u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(500_000u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(name.len() as u64).to_be_bytes::<32>());
        let mut padded = name.as_bytes().to_vec();
        padded.resize(32, 0);
        data.extend_from_slice(&padded);

        let receipt = ChainReceipt {
            tx_hash,
            logs: vec![ChainLog {
                address: REGISTRY_CONTRACT,
                topics: vec![
                    keccak256(b"IPAssetRegistered(address,address,string,uint256)"),
                    asset.into_word(),
                    address!("cccccccccccccccccccccccccccccccccccccccc").into_word(),
                ],
                data: data.into(),
            }],
        };
        (block, receipt)
    }

    #[tokio::test]
    async fn test_range_scanned_once_in_order_and_cursor_advances() {
        // Scenario: cursor=100, height polls 103 → blocks 101–103 scanned,
        // cursor=103.
        let chain = Arc::new(MockChain::new(100));
        let (controller, _rx) = controller(chain.clone(), Arc::new(MemoryStore::new()));

        controller.initialize().await.unwrap();
        assert_eq!(controller.stats().last_whale_block, 100);

        chain.set_height(103);
        controller.whale_tick().await;

        assert_eq!(chain.visited(), vec![101, 102, 103]);
        assert_eq!(controller.stats().last_whale_block, 103);

        // Nothing new → no rescans.
        controller.whale_tick().await;
        assert_eq!(chain.visited(), vec![101, 102, 103]);
    }

    #[tokio::test]
    async fn test_cursor_does_not_advance_on_partial_range() {
        let chain = Arc::new(MockChain::new(100));
        let (controller, mut rx) = controller(chain.clone(), Arc::new(MemoryStore::new()));

        controller.initialize().await.unwrap();
        drain(&mut rx);

        chain.set_height(103);
        chain.fail_at(Some(102));
        controller.whale_tick().await;
        assert_eq!(controller.stats().last_whale_block, 100);

        // Fault emitted a Disconnected signal and re-initialized.
        assert!(matches!(rx.try_recv(), Ok(MonitorEvent::Disconnected { .. })));
        assert!(matches!(rx.try_recv(), Ok(MonitorEvent::Connected { .. })));

        // Endpoint healthy again — the whole range is rescanned.
        chain.fail_at(None);
        controller.whale_tick().await;
        assert_eq!(controller.stats().last_whale_block, 103);
        assert_eq!(chain.visited(), vec![101, 101, 102, 103]);
    }

    #[tokio::test]
    async fn test_whale_transfer_detected_persisted_and_emitted() {
        let chain = Arc::new(MockChain::new(100));
        let store = Arc::new(MemoryStore::new());
        let (controller, mut rx) = controller(chain.clone(), store.clone());

        controller.initialize().await.unwrap();
        drain(&mut rx);

        let (block, receipt) = transfer_block(101, 150);
        chain.add_block(block);
        chain.add_receipt(receipt);
        chain.set_height(101);

        controller.whale_tick().await;

        let whales = store.recent_whale_transactions(24).await.unwrap();
        assert_eq!(whales.len(), 1);
        assert_eq!(whales[0].amount, 150.0);
        assert_eq!(whales[0].token_symbol, "UNKNOWN");

        match rx.try_recv() {
            Ok(MonitorEvent::WhaleDetected { record, verdict }) => {
                assert_eq!(record.amount, 150.0);
                assert_eq!(verdict.window.as_deref(), Some("30s"));
            }
            other => panic!("expected WhaleDetected, got {:?}", other),
        }

        // The stored history feeds the analysis surface.
        let analysis = controller
            .token_analysis("0x1111111111111111111111111111111111111111", 24)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(analysis.total_transactions, 1);
        assert_eq!(analysis.whale_entry, crate::analysis::WhaleEntry::Moderate);
    }

    #[tokio::test]
    async fn test_duplicate_creation_yields_one_record_and_one_event() {
        let chain = Arc::new(MockChain::new(100));
        let store = Arc::new(MemoryStore::new());
        let (controller, mut rx) = controller(chain.clone(), store.clone());

        controller.initialize().await.unwrap();
        drain(&mut rx);

        let asset = address!("4444444444444444444444444444444444444444");
        let (block1, receipt1) = creation_block(101, asset);
        let (block2, receipt2) = creation_block(102, asset);
        chain.add_block(block1);
        chain.add_receipt(receipt1);
        chain.add_block(block2);
        chain.add_receipt(receipt2);
        chain.set_height(102);

        controller.asset_tick().await;

        assert_eq!(store.recent_assets(24).await.unwrap().len(), 1);
        assert!(matches!(rx.try_recv(), Ok(MonitorEvent::AssetCreated(_))));
        assert!(rx.try_recv().is_err());

        // The asset is now fresh in the registry.
        assert_eq!(controller.stats().monitored_tokens, 1);
    }

    #[tokio::test]
    async fn test_initialize_failure_disables_monitor() {
        let chain = Arc::new(MockChain::new(100));
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = Arc::new(AssetRegistry::new(4));
        let classifier = WhaleClassifier::new(&WhaleConfig::default(), registry.clone(), None);
        let connector = Arc::new(MockConnector { chain, fail: Mutex::new(true) });
        let controller = MonitorController::new(
            connector,
            EventDecoder::new(&DecodeConfig::default()),
            registry,
            classifier,
            Arc::new(SubscriberCache::new()),
            Arc::new(MemoryStore::new()),
            tx,
            MonitorSettings {
                scan_interval: Duration::from_millis(10),
                refresh_interval: Duration::from_millis(10),
            },
        );

        assert!(matches!(
            controller.initialize().await,
            Err(MonitorError::EndpointsExhausted)
        ));
        let stats = controller.stats();
        assert_eq!(stats.status, MonitorStatus::Stopped);
        assert_eq!(stats.mode, "disabled");
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let chain = Arc::new(MockChain::new(100));
        let (controller, _rx) = controller(chain, Arc::new(MemoryStore::new()));

        controller.initialize().await.unwrap();
        assert_eq!(controller.stats().status, MonitorStatus::Connected);

        let handles = controller.start().unwrap();
        assert!(controller.stats().running);
        assert!(matches!(controller.start(), Err(MonitorError::AlreadyRunning)));

        controller.stop();
        assert!(!controller.stats().running);
        assert_eq!(controller.stats().status, MonitorStatus::Stopped);

        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MonitorEvent>) {
        while rx.try_recv().is_ok() {}
    }
}
