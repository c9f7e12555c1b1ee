//! Freshness registry: token address → creation timestamp.
//!
//! Rebuilt wholesale from the store on a fixed interval. The refresh builds
//! the complete map first and then swaps the shared `Arc`, so readers never
//! observe a partially populated registry.

use crate::store::Store;

use alloy::primitives::Address;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

pub struct AssetRegistry {
    /// Tokens created within this window count as fresh.
    window: Duration,
    entries: RwLock<Arc<HashMap<Address, DateTime<Utc>>>>,
}

impl AssetRegistry {
    pub fn new(window_hours: u64) -> Self {
        Self {
            window: Duration::hours(window_hours as i64),
            entries: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Rebuild the registry from assets created inside the freshness window.
    pub async fn refresh(&self, store: &dyn Store) -> anyhow::Result<usize> {
        let hours = self.window.num_hours().max(1) as u64;
        let recent = store.recent_assets(hours).await?;

        let mut map = HashMap::with_capacity(recent.len());
        for asset in &recent {
            if let Ok(address) = Address::from_str(&asset.address) {
                map.insert(address, asset.created_at);
            }
        }

        let count = map.len();
        *self.entries.write().unwrap() = Arc::new(map);
        info!(tokens = count, "freshness registry refreshed");
        Ok(count)
    }

    fn snapshot(&self) -> Arc<HashMap<Address, DateTime<Utc>>> {
        self.entries.read().unwrap().clone()
    }

    /// Creation timestamp for a token, if it is in the registry.
    pub fn created_at(&self, token: Address) -> Option<DateTime<Utc>> {
        self.snapshot().get(&token).copied()
    }

    /// True when the token was created within the freshness window of `at`.
    /// Re-evaluated per event so a token ages out naturally between
    /// refreshes.
    pub fn is_fresh(&self, token: Address, at: DateTime<Utc>) -> bool {
        match self.created_at(token) {
            Some(created) => at - created < self.window,
            None => false,
        }
    }

    /// Human-readable token age at `at` ("37m", "2h 13m"), if known.
    pub fn age(&self, token: Address, at: DateTime<Utc>) -> Option<String> {
        let created = self.created_at(token)?;
        let minutes = (at - created).num_minutes().max(0);
        if minutes < 60 {
            Some(format!("{}m", minutes))
        } else {
            Some(format!("{}h {}m", minutes / 60, minutes % 60))
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test/seed helper: insert a single entry without a store round-trip.
    pub fn insert(&self, token: Address, created_at: DateTime<Utc>) {
        let mut map = (*self.snapshot()).clone();
        map.insert(token, created_at);
        *self.entries.write().unwrap() = Arc::new(map);
        debug!(token = %token, "registry entry inserted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AssetRecord, MemoryStore};
    use alloy::primitives::address;

    fn record(address: &str, hours_ago: i64) -> AssetRecord {
        AssetRecord {
            address: address.to_string(),
            name: "Asset".to_string(),
            creator: "0xabc".to_string(),
            initial_supply: 1.0,
            created_at: Utc::now() - Duration::hours(hours_ago),
            tx_hash: "0x1".to_string(),
            block_number: 1,
            first_seen: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_refresh_swaps_whole_map() {
        let registry = AssetRegistry::new(4);
        let store = MemoryStore::new();
        store
            .save_asset(&record("0x1111111111111111111111111111111111111111", 1))
            .await
            .unwrap();

        assert_eq!(registry.refresh(&store).await.unwrap(), 1);
        assert_eq!(registry.len(), 1);

        // A second refresh from an emptier store replaces, not merges.
        let empty = MemoryStore::new();
        assert_eq!(registry.refresh(&empty).await.unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_freshness_window_boundary() {
        let registry = AssetRegistry::new(4);
        let token = address!("1111111111111111111111111111111111111111");
        let now = Utc::now();

        registry.insert(token, now - Duration::hours(3));
        assert!(registry.is_fresh(token, now));

        registry.insert(token, now - Duration::hours(5));
        assert!(!registry.is_fresh(token, now));

        let unknown = address!("2222222222222222222222222222222222222222");
        assert!(!registry.is_fresh(unknown, now));
    }

    #[test]
    fn test_age_formatting() {
        let registry = AssetRegistry::new(4);
        let token = address!("1111111111111111111111111111111111111111");
        let now = Utc::now();

        registry.insert(token, now - Duration::minutes(37));
        assert_eq!(registry.age(token, now).unwrap(), "37m");

        registry.insert(token, now - Duration::minutes(133));
        assert_eq!(registry.age(token, now).unwrap(), "2h 13m");
    }
}
