//! Whale classification for decoded transfers.
//!
//! Order of checks per transfer:
//! 1. hygiene — zero amounts and zero-address legs are never candidates
//! 2. market-cap ceiling — tokens above the ceiling are excluded for good
//! 3. volume windows — aggregate burst detection (preferred path)
//! 4. single-transaction fallback — when no windows are configured,
//!    one transfer clearing the laxest subscriber threshold fires,
//!    discounted for freshly created tokens

use crate::config::WhaleConfig;
use crate::decode::TransferEvent;
use crate::market::MarketData;
use crate::registry::AssetRegistry;
use crate::store::TransferCategory;
use crate::volume::{VolumeTracker, VolumeWindow};

use alloy::primitives::Address;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The outcome of a positive classification. Derived per event, never
/// stored on its own.
#[derive(Debug, Clone)]
pub struct WhaleVerdict {
    /// Window that tripped, `None` on the single-transaction path.
    pub window: Option<String>,
    pub volume: f64,
    pub count: usize,
    pub reason: String,
}

pub struct WhaleClassifier {
    tracker: VolumeTracker,
    market: Option<Arc<dyn MarketData>>,
    /// Tokens flagged over the market-cap ceiling. Never re-checked.
    excluded: HashSet<Address>,
    registry: Arc<AssetRegistry>,
    routers: Vec<Address>,
    market_cap_ceiling: f64,
    freshness_discount: f64,
}

impl WhaleClassifier {
    pub fn new(
        config: &WhaleConfig,
        registry: Arc<AssetRegistry>,
        market: Option<Arc<dyn MarketData>>,
    ) -> Self {
        let windows = config
            .windows
            .iter()
            .map(|w| VolumeWindow::new(Duration::from_secs(w.duration_secs), w.volume_threshold))
            .collect();

        let routers = config
            .router_addresses
            .iter()
            .filter_map(|s| match Address::from_str(s) {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(address = %s, "ignoring malformed router address");
                    None
                }
            })
            .collect();

        Self {
            tracker: VolumeTracker::new(windows),
            market,
            excluded: HashSet::new(),
            registry,
            routers,
            market_cap_ceiling: config.market_cap_ceiling_usd,
            freshness_discount: config.freshness_discount,
        }
    }

    /// Classify one transfer. `amount` is the decimal-scaled token amount;
    /// `min_threshold` is the laxest threshold across current subscribers
    /// (only consulted on the fallback path — per-subscriber filtering
    /// happens again at dispatch).
    pub async fn classify(
        &mut self,
        event: &TransferEvent,
        amount: f64,
        min_threshold: f64,
    ) -> Option<WhaleVerdict> {
        if amount <= 0.0 {
            return None;
        }
        if event.from == Address::ZERO || event.to == Address::ZERO {
            return None;
        }

        if self.is_high_cap(event.token_address).await {
            return None;
        }

        if !self.tracker.is_empty() {
            let hit = self.tracker.record(event.token_address, amount, event.timestamp)?;
            return Some(WhaleVerdict {
                reason: format!(
                    "volume spike: {} in {} across {} transfers",
                    hit.volume, hit.window, hit.count
                ),
                window: Some(hit.window),
                volume: hit.volume,
                count: hit.count,
            });
        }

        // Single-transaction fallback.
        let mut threshold = min_threshold;
        if self.registry.is_fresh(event.token_address, event.timestamp) {
            threshold *= self.freshness_discount;
        }
        if amount >= threshold {
            return Some(WhaleVerdict {
                window: None,
                volume: amount,
                count: 1,
                reason: format!("single transfer of {} ≥ threshold {}", amount, threshold),
            });
        }
        None
    }

    /// Market-cap ceiling check with a permanent per-token exclusion cache.
    /// Lookup failures count as "unknown" and do not exclude.
    async fn is_high_cap(&mut self, token: Address) -> bool {
        if self.excluded.contains(&token) {
            return true;
        }
        let Some(market) = &self.market else {
            return false;
        };

        match market.market_cap_usd(token).await {
            Ok(Some(cap)) if cap > self.market_cap_ceiling => {
                info!(
                    token = %token,
                    market_cap = cap,
                    ceiling = self.market_cap_ceiling,
                    "token excluded: market cap above ceiling"
                );
                self.excluded.insert(token);
                self.tracker.forget(token);
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(token = %token, error = %e, "market cap lookup failed, proceeding");
                false
            }
        }
    }

    /// Buy/sell/transfer heuristic against the configured router list.
    pub fn categorize(&self, from: Address, to: Address) -> TransferCategory {
        if self.routers.contains(&from) {
            TransferCategory::Buy
        } else if self.routers.contains(&to) {
            TransferCategory::Sell
        } else {
            TransferCategory::Transfer
        }
    }

    pub fn tracked_tokens(&self) -> usize {
        self.tracker.tracked_tokens()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WhaleConfig, WindowConfig};
    use alloy::primitives::{address, B256};
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn transfer(token: Address, at: DateTime<Utc>) -> TransferEvent {
        TransferEvent {
            token_address: token,
            from: address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"),
            to: address!("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"),
            amount_raw: Default::default(),
            tx_hash: B256::ZERO,
            block_number: 1,
            timestamp: at,
        }
    }

    fn windowed_config() -> WhaleConfig {
        WhaleConfig {
            windows: vec![WindowConfig { duration_secs: 30, volume_threshold: 100.0 }],
            ..WhaleConfig::default()
        }
    }

    fn fallback_config() -> WhaleConfig {
        WhaleConfig {
            windows: Vec::new(),
            ..WhaleConfig::default()
        }
    }

    struct FixedCap {
        cap: Option<f64>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl MarketData for FixedCap {
        async fn market_cap_usd(&self, _token: Address) -> anyhow::Result<Option<f64>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.cap)
        }
    }

    #[tokio::test]
    async fn test_zero_amount_and_zero_address_never_qualify() {
        let registry = Arc::new(AssetRegistry::new(4));
        let mut classifier = WhaleClassifier::new(&fallback_config(), registry, None);
        let token = address!("1111111111111111111111111111111111111111");

        let event = transfer(token, t(0));
        assert!(classifier.classify(&event, 0.0, 40.0).await.is_none());

        let mut from_zero = transfer(token, t(0));
        from_zero.from = Address::ZERO;
        assert!(classifier.classify(&from_zero, 500.0, 40.0).await.is_none());

        let mut to_zero = transfer(token, t(0));
        to_zero.to = Address::ZERO;
        assert!(classifier.classify(&to_zero, 500.0, 40.0).await.is_none());
    }

    #[tokio::test]
    async fn test_volume_burst_fires_thirty_second_window() {
        let registry = Arc::new(AssetRegistry::new(4));
        let mut classifier = WhaleClassifier::new(&windowed_config(), registry, None);
        let token = address!("1111111111111111111111111111111111111111");

        assert!(classifier.classify(&transfer(token, t(0)), 40.0, 40.0).await.is_none());
        assert!(classifier.classify(&transfer(token, t(10)), 40.0, 40.0).await.is_none());

        let verdict = classifier
            .classify(&transfer(token, t(20)), 40.0, 40.0)
            .await
            .unwrap();
        assert_eq!(verdict.window.as_deref(), Some("30s"));
        assert_eq!(verdict.volume, 120.0);
        assert_eq!(verdict.count, 3);
    }

    #[tokio::test]
    async fn test_high_cap_token_is_excluded_and_cached() {
        let registry = Arc::new(AssetRegistry::new(4));
        let market = Arc::new(FixedCap { cap: Some(250_000.0), lookups: AtomicUsize::new(0) });
        let mut classifier =
            WhaleClassifier::new(&windowed_config(), registry, Some(market.clone()));
        let token = address!("1111111111111111111111111111111111111111");

        for i in 0..5 {
            let verdict = classifier
                .classify(&transfer(token, t(i)), 1_000.0, 40.0)
                .await;
            assert!(verdict.is_none());
        }
        // Exclusion is cached after the first lookup.
        assert_eq!(market.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_low_cap_token_still_evaluated() {
        let registry = Arc::new(AssetRegistry::new(4));
        let market = Arc::new(FixedCap { cap: Some(50_000.0), lookups: AtomicUsize::new(0) });
        let mut classifier = WhaleClassifier::new(&windowed_config(), registry, Some(market));
        let token = address!("1111111111111111111111111111111111111111");

        let verdict = classifier
            .classify(&transfer(token, t(0)), 150.0, 40.0)
            .await;
        assert!(verdict.is_some());
    }

    #[tokio::test]
    async fn test_fallback_uses_minimum_threshold() {
        let registry = Arc::new(AssetRegistry::new(4));
        let mut classifier = WhaleClassifier::new(&fallback_config(), registry, None);
        let token = address!("1111111111111111111111111111111111111111");

        let verdict = classifier.classify(&transfer(token, t(0)), 45.0, 40.0).await;
        assert!(verdict.is_some());
        let verdict = verdict.unwrap();
        assert!(verdict.window.is_none());
        assert_eq!(verdict.count, 1);

        assert!(classifier.classify(&transfer(token, t(1)), 39.0, 40.0).await.is_none());
    }

    #[tokio::test]
    async fn test_freshness_discounts_fallback_threshold() {
        let registry = Arc::new(AssetRegistry::new(4));
        let token = address!("1111111111111111111111111111111111111111");
        registry.insert(token, t(0) - chrono::Duration::hours(1));

        let mut classifier = WhaleClassifier::new(&fallback_config(), registry.clone(), None);

        // 40 × 0.7 = 28 effective threshold for a fresh token.
        assert!(classifier.classify(&transfer(token, t(0)), 30.0, 40.0).await.is_some());
        assert!(classifier.classify(&transfer(token, t(1)), 27.0, 40.0).await.is_none());

        // A stale token gets the undiscounted threshold.
        let stale = address!("2222222222222222222222222222222222222222");
        registry.insert(stale, t(0) - chrono::Duration::hours(5));
        assert!(classifier.classify(&transfer(stale, t(0)), 30.0, 40.0).await.is_none());
    }

    #[test]
    fn test_categorize_against_router_list() {
        let registry = Arc::new(AssetRegistry::new(4));
        let router = "0xcccccccccccccccccccccccccccccccccccccccc";
        let config = WhaleConfig {
            router_addresses: vec![router.to_string()],
            ..WhaleConfig::default()
        };
        let classifier = WhaleClassifier::new(&config, registry, None);
        let router = Address::from_str(router).unwrap();
        let wallet = address!("dddddddddddddddddddddddddddddddddddddddd");

        assert_eq!(classifier.categorize(router, wallet), TransferCategory::Buy);
        assert_eq!(classifier.categorize(wallet, router), TransferCategory::Sell);
        assert_eq!(classifier.categorize(wallet, wallet), TransferCategory::Transfer);
    }
}
