//! Raw transaction and log decoding into typed events.
//!
//! Two paths:
//! - **Transfer**: ERC-20 `Transfer` logs matched by topic0, indexed
//!   from/to recovered from padded topics, amount from the data word.
//! - **Asset creation**: transactions aimed at a registry contract (or
//!   carrying a known function selector), confirmed by the creation event
//!   in the receipt logs.
//!
//! Decode failures never raise — anything that does not match is simply
//! not of interest. Token metadata reads fall back to sentinel values so a
//! misbehaving token contract cannot stall detection.

use crate::chain::{ChainClient, ChainLog, ChainReceipt, ChainTx};
use crate::config::DecodeConfig;

use alloy::primitives::{b256, Address, B256, U256};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::str::FromStr;
use tracing::{debug, warn};

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

// ERC-20 metadata selectors.
const NAME_SELECTOR: [u8; 4] = [0x06, 0xfd, 0xde, 0x03];
const SYMBOL_SELECTOR: [u8; 4] = [0x95, 0xd8, 0x9b, 0x41];
const DECIMALS_SELECTOR: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

/// A decoded ERC-20 transfer, still in raw token units.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    pub token_address: Address,
    pub from: Address,
    pub to: Address,
    pub amount_raw: U256,
    pub tx_hash: B256,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// A decoded asset-creation event. Immutable once decoded; dedup key is
/// the asset address.
#[derive(Debug, Clone)]
pub struct AssetCreationEvent {
    pub address: Address,
    pub name: String,
    pub creator: Address,
    pub initial_supply: f64,
    pub created_at: DateTime<Utc>,
    pub tx_hash: B256,
    pub block_number: u64,
}

/// name/symbol/decimals for a token, sentinel-filled when unavailable.
#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: "Unknown Token".to_string(),
            symbol: "UNKNOWN".to_string(),
            decimals: 18,
        }
    }
}

/// Decoder configured with the registry contracts, creation selectors and
/// creation event signature to watch for.
pub struct EventDecoder {
    creation_topic: B256,
    registry_contracts: Vec<Address>,
    creation_selectors: Vec<[u8; 4]>,
}

impl EventDecoder {
    pub fn new(config: &DecodeConfig) -> Self {
        let registry_contracts = config
            .registry_contracts
            .iter()
            .filter_map(|s| match Address::from_str(s) {
                Ok(addr) => Some(addr),
                Err(_) => {
                    warn!(address = %s, "ignoring malformed registry contract address");
                    None
                }
            })
            .collect();

        let creation_selectors = config
            .creation_selectors
            .iter()
            .filter_map(|s| {
                let bytes = alloy::primitives::hex::decode(s.trim_start_matches("0x")).ok()?;
                let selector: [u8; 4] = bytes.try_into().ok()?;
                Some(selector)
            })
            .collect();

        Self {
            creation_topic: keccak256(config.creation_event.as_bytes()),
            registry_contracts,
            creation_selectors,
        }
    }

    /// Decode a log as an ERC-20 transfer. Returns `None` for anything that
    /// is not a well-formed transfer (wrong topic, wrong shape).
    pub fn decode_transfer(
        &self,
        log: &ChainLog,
        tx_hash: B256,
        block_number: u64,
        timestamp: u64,
    ) -> Option<TransferEvent> {
        if log.topics.first() != Some(&TRANSFER_TOPIC) {
            return None;
        }

        // Transfer(address indexed from, address indexed to, uint256 value)
        if log.topics.len() != 3 {
            debug!(
                token = %log.address,
                topics = log.topics.len(),
                "transfer-topic log with unexpected topic count"
            );
            return None;
        }

        let from = Address::from_slice(&log.topics[1].0[12..]);
        let to = Address::from_slice(&log.topics[2].0[12..]);

        if log.data.len() < 32 {
            return None;
        }
        let amount_bytes: [u8; 32] = log.data[0..32].try_into().ok()?;
        let amount_raw = U256::from_be_bytes(amount_bytes);

        Some(TransferEvent {
            token_address: log.address,
            from,
            to,
            amount_raw,
            tx_hash,
            block_number,
            timestamp: DateTime::from_timestamp(timestamp as i64, 0).unwrap_or_default(),
        })
    }

    /// True when the transaction is worth a receipt lookup for the creation
    /// event: sent to a registry contract, or carrying a known selector.
    pub fn is_creation_candidate(&self, tx: &ChainTx) -> bool {
        if let Some(to) = tx.to {
            if self.registry_contracts.contains(&to) {
                return true;
            }
        }
        if tx.input.len() >= 4 {
            let selector: [u8; 4] = tx.input[0..4].try_into().unwrap_or_default();
            if self.creation_selectors.contains(&selector) {
                return true;
            }
        }
        false
    }

    /// Scan a receipt's logs for the creation event and decode it.
    ///
    /// Event shape: `(address indexed asset, address indexed creator,
    /// string name, uint256 initialSupply)` — data holds the name offset
    /// word, the supply word, then the string payload.
    pub fn decode_creation(
        &self,
        receipt: &ChainReceipt,
        block_number: u64,
        timestamp: u64,
    ) -> Option<AssetCreationEvent> {
        for log in &receipt.logs {
            if log.topics.first() != Some(&self.creation_topic) {
                continue;
            }
            if log.topics.len() != 3 {
                debug!(topics = log.topics.len(), "creation event with unexpected topic count");
                continue;
            }

            let asset = Address::from_slice(&log.topics[1].0[12..]);
            let creator = Address::from_slice(&log.topics[2].0[12..]);

            let data = &log.data;
            if data.len() < 64 {
                continue;
            }
            let supply_bytes: [u8; 32] = data[32..64].try_into().ok()?;
            let supply_raw = U256::from_be_bytes(supply_bytes);
            let name = decode_string_return(data).unwrap_or_else(|| "Unnamed Asset".to_string());

            return Some(AssetCreationEvent {
                address: asset,
                name,
                creator,
                initial_supply: u256_to_f64(supply_raw),
                created_at: DateTime::from_timestamp(timestamp as i64, 0).unwrap_or_default(),
                tx_hash: receipt.tx_hash,
                block_number,
            });
        }
        None
    }
}

/// Decode an ABI-encoded string whose offset word sits at the start of
/// `data` (the layout of both a `string` return value and the first
/// non-indexed `string` param of an event).
fn decode_string_return(data: &[u8]) -> Option<String> {
    if data.len() < 32 {
        return None;
    }
    let offset_bytes: [u8; 32] = data[0..32].try_into().ok()?;
    let offset: usize = U256::from_be_bytes(offset_bytes).try_into().ok()?;

    if offset + 32 > data.len() {
        return None;
    }
    let len_bytes: [u8; 32] = data[offset..offset + 32].try_into().ok()?;
    let len: usize = U256::from_be_bytes(len_bytes).try_into().ok()?;

    if len == 0 || offset + 32 + len > data.len() {
        return None;
    }
    let raw = &data[offset + 32..offset + 32 + len];
    std::str::from_utf8(raw).ok().map(|s| s.trim_end_matches('\0').to_string())
}

fn u256_to_f64(value: U256) -> f64 {
    value.to_string().parse::<f64>().unwrap_or(0.0)
}

/// Scale a raw token amount by the token's decimals into whole-token units,
/// rounded to two places.
pub fn scale_amount(raw: U256, decimals: u8) -> f64 {
    let scaled = u256_to_f64(raw) / 10f64.powi(decimals as i32);
    (scaled * 100.0).round() / 100.0
}

// ─── Token metadata resolution ───────────────────────────────────────────────

/// Resolves and caches name/symbol/decimals via `eth_call`. Each read is
/// individually time-boxed by the client; an unavailable field falls back to
/// its sentinel instead of aborting detection.
pub struct MetadataResolver {
    cache: DashMap<Address, TokenMetadata>,
}

impl MetadataResolver {
    pub fn new() -> Self {
        Self { cache: DashMap::new() }
    }

    pub async fn resolve(&self, client: &dyn ChainClient, token: Address) -> TokenMetadata {
        if let Some(cached) = self.cache.get(&token) {
            return cached.clone();
        }

        let sentinel = TokenMetadata::default();

        let name = match client.call(token, NAME_SELECTOR.to_vec().into()).await {
            Ok(data) => decode_string_return(&data).unwrap_or(sentinel.name),
            Err(e) => {
                debug!(token = %token, error = %e, "name() unavailable, using sentinel");
                sentinel.name
            }
        };

        let symbol = match client.call(token, SYMBOL_SELECTOR.to_vec().into()).await {
            Ok(data) => decode_string_return(&data).unwrap_or(sentinel.symbol),
            Err(e) => {
                debug!(token = %token, error = %e, "symbol() unavailable, using sentinel");
                sentinel.symbol
            }
        };

        let decimals = match client.call(token, DECIMALS_SELECTOR.to_vec().into()).await {
            Ok(data) if data.len() >= 32 => data[31],
            Ok(_) => sentinel.decimals,
            Err(e) => {
                debug!(token = %token, error = %e, "decimals() unavailable, using sentinel");
                sentinel.decimals
            }
        };

        let metadata = TokenMetadata { name, symbol, decimals };
        self.cache.insert(token, metadata.clone());
        metadata
    }
}

impl Default for MetadataResolver {
    fn default() -> Self {
        Self::new()
    }
}
