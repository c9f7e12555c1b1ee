//! Persistence layer: one fixed CRUD interface with a Valkey (Redis-compatible)
//! implementation and an in-memory implementation for tests and degraded runs.
//!
//! Valkey data model:
//!   asset:{address}        → JSON AssetRecord
//!   assets_by_time         → ZSET address scored by created_at epoch
//!   whale:{tx_hash}        → JSON WhaleTransactionRecord
//!   whales_by_time         → ZSET tx_hash scored by timestamp epoch
//!   subscriber:{user_id}   → JSON Subscriber
//!   subscribers            → SET of user_ids
//!
//! All keys are namespaced under a configurable prefix to allow multiple
//! instances to share a single Valkey without collisions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Threshold applied when a subscriber has not configured their own.
pub const DEFAULT_WHALE_THRESHOLD: f64 = 40.0;

/// A tokenized asset first seen by the creation scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Token contract address (lowercase hex). Dedup key.
    pub address: String,
    pub name: String,
    pub creator: String,
    pub initial_supply: f64,
    pub created_at: DateTime<Utc>,
    pub tx_hash: String,
    pub block_number: u64,
    pub first_seen: DateTime<Utc>,
}

/// How a transfer relates to known router contracts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferCategory {
    Buy,
    Sell,
    Transfer,
}

impl std::fmt::Display for TransferCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferCategory::Buy => write!(f, "buy"),
            TransferCategory::Sell => write!(f, "sell"),
            TransferCategory::Transfer => write!(f, "transfer"),
        }
    }
}

/// A transfer that passed whale classification, enriched with token metadata.
/// Persisted once per transaction hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhaleTransactionRecord {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub token_name: String,
    pub token_symbol: String,
    pub amount: f64,
    pub category: TransferCategory,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    /// Token was created within the freshness window at detection time.
    pub is_fresh_token: bool,
    /// Human-readable token age ("37m", "2h 13m") when known.
    pub token_age: Option<String>,
    /// Why the classifier fired.
    pub reason: String,
}

/// An alert recipient with their personal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub user_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub whale_threshold: f64,
    pub asset_alerts: bool,
    pub whale_alerts: bool,
}

impl Subscriber {
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self {
            user_id,
            chat_id,
            username: None,
            whale_threshold: DEFAULT_WHALE_THRESHOLD,
            asset_alerts: true,
            whale_alerts: true,
        }
    }
}

/// The fixed persistence interface consumed by the monitor and dispatcher.
/// Upserts are idempotent by their natural key; there is no capability
/// probing — every implementation provides the full contract.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_asset(&self, asset: &AssetRecord) -> anyhow::Result<()>;
    async fn get_asset(&self, address: &str) -> anyhow::Result<Option<AssetRecord>>;
    /// Assets created within the last `hours`, newest first.
    async fn recent_assets(&self, hours: u64) -> anyhow::Result<Vec<AssetRecord>>;

    async fn save_whale_transaction(&self, tx: &WhaleTransactionRecord) -> anyhow::Result<()>;
    /// Whale transactions within the last `hours`, newest first.
    async fn recent_whale_transactions(
        &self,
        hours: u64,
    ) -> anyhow::Result<Vec<WhaleTransactionRecord>>;

    /// Subscribers with at least one alert class enabled.
    async fn alertable_subscribers(&self) -> anyhow::Result<Vec<Subscriber>>;
    async fn subscriber_threshold(&self, user_id: i64) -> anyhow::Result<f64>;
    async fn set_subscriber_threshold(&self, user_id: i64, threshold: f64) -> anyhow::Result<()>;
}

// ─── Valkey implementation ───────────────────────────────────────────────────

/// Valkey-backed store.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisStore {
    /// Connect to Valkey/Redis.
    pub async fn connect(url: &str, prefix: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!(url = url, prefix = prefix, "connected to Valkey");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    /// Build a namespaced key: "{prefix}:{suffix}"
    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.prefix, suffix)
    }

    /// Test connectivity.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!(response = %pong, "Valkey ping");
        Ok(())
    }

    async fn members_since(&self, zset: &str, hours: u64) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let cutoff = Utc::now().timestamp() - (hours as i64) * 3600;
        let key = self.key(zset);
        // Newest first for display.
        let members: Vec<String> = redis::cmd("ZREVRANGEBYSCORE")
            .arg(&key)
            .arg("+inf")
            .arg(cutoff)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn save_asset(&self, asset: &AssetRecord) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("asset:{}", asset.address));
        let json = serde_json::to_string(asset)?;
        conn.set::<_, _, ()>(&key, &json).await?;
        conn.zadd::<_, _, _, ()>(
            self.key("assets_by_time"),
            &asset.address,
            asset.created_at.timestamp(),
        )
        .await?;
        debug!(address = %asset.address, name = %asset.name, "stored asset record");
        Ok(())
    }

    async fn get_asset(&self, address: &str) -> anyhow::Result<Option<AssetRecord>> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("asset:{}", address));
        let json: Option<String> = conn.get(&key).await?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    async fn recent_assets(&self, hours: u64) -> anyhow::Result<Vec<AssetRecord>> {
        let addresses = self.members_since("assets_by_time", hours).await?;
        let mut conn = self.conn.clone();
        let mut assets = Vec::with_capacity(addresses.len());
        for address in addresses {
            let key = self.key(&format!("asset:{}", address));
            let json: Option<String> = conn.get(&key).await?;
            if let Some(j) = json {
                if let Ok(asset) = serde_json::from_str::<AssetRecord>(&j) {
                    assets.push(asset);
                }
            }
        }
        Ok(assets)
    }

    async fn save_whale_transaction(&self, tx: &WhaleTransactionRecord) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("whale:{}", tx.tx_hash));
        let json = serde_json::to_string(tx)?;
        conn.set::<_, _, ()>(&key, &json).await?;
        conn.zadd::<_, _, _, ()>(
            self.key("whales_by_time"),
            &tx.tx_hash,
            tx.timestamp.timestamp(),
        )
        .await?;
        debug!(
            tx_hash = %tx.tx_hash,
            amount = tx.amount,
            symbol = %tx.token_symbol,
            "stored whale transaction"
        );
        Ok(())
    }

    async fn recent_whale_transactions(
        &self,
        hours: u64,
    ) -> anyhow::Result<Vec<WhaleTransactionRecord>> {
        let hashes = self.members_since("whales_by_time", hours).await?;
        let mut conn = self.conn.clone();
        let mut txs = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let key = self.key(&format!("whale:{}", hash));
            let json: Option<String> = conn.get(&key).await?;
            if let Some(j) = json {
                if let Ok(tx) = serde_json::from_str::<WhaleTransactionRecord>(&j) {
                    txs.push(tx);
                }
            }
        }
        Ok(txs)
    }

    async fn alertable_subscribers(&self) -> anyhow::Result<Vec<Subscriber>> {
        let mut conn = self.conn.clone();
        let ids: Vec<i64> = conn.smembers(self.key("subscribers")).await?;
        let mut subscribers = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.key(&format!("subscriber:{}", id));
            let json: Option<String> = conn.get(&key).await?;
            if let Some(j) = json {
                if let Ok(sub) = serde_json::from_str::<Subscriber>(&j) {
                    if sub.asset_alerts || sub.whale_alerts {
                        subscribers.push(sub);
                    }
                }
            }
        }
        Ok(subscribers)
    }

    async fn subscriber_threshold(&self, user_id: i64) -> anyhow::Result<f64> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("subscriber:{}", user_id));
        let json: Option<String> = conn.get(&key).await?;
        Ok(json
            .and_then(|j| serde_json::from_str::<Subscriber>(&j).ok())
            .map(|s| s.whale_threshold)
            .unwrap_or(DEFAULT_WHALE_THRESHOLD))
    }

    async fn set_subscriber_threshold(&self, user_id: i64, threshold: f64) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(&format!("subscriber:{}", user_id));
        let json: Option<String> = conn.get(&key).await?;
        let mut sub = json
            .and_then(|j| serde_json::from_str::<Subscriber>(&j).ok())
            .unwrap_or_else(|| Subscriber::new(user_id, user_id));
        sub.whale_threshold = threshold;
        conn.set::<_, _, ()>(&key, serde_json::to_string(&sub)?).await?;
        conn.sadd::<_, _, ()>(self.key("subscribers"), user_id).await?;
        info!(user_id = user_id, threshold = threshold, "subscriber threshold updated");
        Ok(())
    }
}

// ─── In-memory implementation ────────────────────────────────────────────────

/// In-memory store. Used by tests and as the degraded mode when Valkey is
/// unreachable at startup.
#[derive(Default)]
pub struct MemoryStore {
    assets: Mutex<HashMap<String, AssetRecord>>,
    whales: Mutex<HashMap<String, WhaleTransactionRecord>>,
    subscribers: Mutex<HashMap<i64, Subscriber>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a subscriber directly (test helper and registration hook).
    pub fn insert_subscriber(&self, sub: Subscriber) {
        self.subscribers.lock().unwrap().insert(sub.user_id, sub);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn save_asset(&self, asset: &AssetRecord) -> anyhow::Result<()> {
        self.assets
            .lock()
            .unwrap()
            .insert(asset.address.clone(), asset.clone());
        Ok(())
    }

    async fn get_asset(&self, address: &str) -> anyhow::Result<Option<AssetRecord>> {
        Ok(self.assets.lock().unwrap().get(address).cloned())
    }

    async fn recent_assets(&self, hours: u64) -> anyhow::Result<Vec<AssetRecord>> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours as i64);
        let mut assets: Vec<AssetRecord> = self
            .assets
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.created_at > cutoff)
            .cloned()
            .collect();
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(assets)
    }

    async fn save_whale_transaction(&self, tx: &WhaleTransactionRecord) -> anyhow::Result<()> {
        self.whales
            .lock()
            .unwrap()
            .insert(tx.tx_hash.clone(), tx.clone());
        Ok(())
    }

    async fn recent_whale_transactions(
        &self,
        hours: u64,
    ) -> anyhow::Result<Vec<WhaleTransactionRecord>> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours as i64);
        let mut txs: Vec<WhaleTransactionRecord> = self
            .whales
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.timestamp > cutoff)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(txs)
    }

    async fn alertable_subscribers(&self) -> anyhow::Result<Vec<Subscriber>> {
        let mut subs: Vec<Subscriber> = self
            .subscribers
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.asset_alerts || s.whale_alerts)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.user_id);
        Ok(subs)
    }

    async fn subscriber_threshold(&self, user_id: i64) -> anyhow::Result<f64> {
        Ok(self
            .subscribers
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|s| s.whale_threshold)
            .unwrap_or(DEFAULT_WHALE_THRESHOLD))
    }

    async fn set_subscriber_threshold(&self, user_id: i64, threshold: f64) -> anyhow::Result<()> {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers
            .entry(user_id)
            .or_insert_with(|| Subscriber::new(user_id, user_id))
            .whale_threshold = threshold;
        Ok(())
    }
}
