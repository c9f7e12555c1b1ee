//! Launch-pattern analysis over stored whale-transaction history.
//!
//! Pure read-only helpers for the command layer: early-window activity
//! stats, launch-phase classification and whale-entry classification for a
//! single token. Callers pass records in ascending timestamp order.

use crate::store::WhaleTransactionRecord;

use std::collections::HashSet;
use std::time::Duration;

/// Transfers considered "large" for whale-entry classification.
const LARGE_ENTRY_AMOUNT: f64 = 100.0;
/// How many of the earliest transfers feed the launch-phase heuristic.
const LAUNCH_SAMPLE: usize = 20;

/// Aggregate activity inside the first observation window after launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchWindowStats {
    pub tx_count: usize,
    pub unique_wallets: usize,
    pub total_volume: f64,
    pub avg_tx_size: f64,
}

/// How concentrated the earliest buyers were.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchPhase {
    SingleBuyer,
    Coordinated,
    Normal,
    Organic,
    Unknown,
}

impl std::fmt::Display for LaunchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchPhase::SingleBuyer => write!(f, "single_buyer"),
            LaunchPhase::Coordinated => write!(f, "coordinated"),
            LaunchPhase::Normal => write!(f, "normal"),
            LaunchPhase::Organic => write!(f, "organic"),
            LaunchPhase::Unknown => write!(f, "unknown"),
        }
    }
}

/// How heavily whales entered the token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhaleEntry {
    None,
    Moderate,
    Heavy,
}

impl std::fmt::Display for WhaleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhaleEntry::None => write!(f, "none"),
            WhaleEntry::Moderate => write!(f, "moderate"),
            WhaleEntry::Heavy => write!(f, "heavy"),
        }
    }
}

/// Full analysis for one token's transfer history.
#[derive(Debug, Clone)]
pub struct TokenAnalysis {
    pub total_transactions: usize,
    pub first_ten_minutes: Option<LaunchWindowStats>,
    pub launch_phase: LaunchPhase,
    pub whale_entry: WhaleEntry,
}

/// Analyze a token's history. `None` when there is no data at all.
pub fn analyze_token(records: &[WhaleTransactionRecord]) -> Option<TokenAnalysis> {
    if records.is_empty() {
        return None;
    }
    Some(TokenAnalysis {
        total_transactions: records.len(),
        first_ten_minutes: launch_window_stats(records, Duration::from_secs(600)),
        launch_phase: launch_phase(records),
        whale_entry: whale_entry(records),
    })
}

/// Stats over the transfers landing within `window` of the first one.
pub fn launch_window_stats(
    records: &[WhaleTransactionRecord],
    window: Duration,
) -> Option<LaunchWindowStats> {
    let launch = records.first()?.timestamp;
    let horizon = chrono::Duration::from_std(window).ok()?;

    let mut wallets = HashSet::new();
    let mut tx_count = 0usize;
    let mut total_volume = 0.0;

    for record in records {
        if record.timestamp - launch > horizon {
            break;
        }
        tx_count += 1;
        wallets.insert(record.from.as_str());
        total_volume += record.amount;
    }

    let avg_tx_size = if tx_count > 0 {
        total_volume / tx_count as f64
    } else {
        0.0
    };

    Some(LaunchWindowStats {
        tx_count,
        unique_wallets: wallets.len(),
        total_volume,
        avg_tx_size,
    })
}

/// Classify the launch by unique-wallet spread across the earliest transfers.
pub fn launch_phase(records: &[WhaleTransactionRecord]) -> LaunchPhase {
    if records.is_empty() {
        return LaunchPhase::Unknown;
    }
    let sample = &records[..records.len().min(LAUNCH_SAMPLE)];
    let wallets: HashSet<&str> = sample.iter().map(|r| r.from.as_str()).collect();

    match wallets.len() {
        1 => LaunchPhase::SingleBuyer,
        n if n < 5 => LaunchPhase::Coordinated,
        n if n >= 10 => LaunchPhase::Organic,
        _ => LaunchPhase::Normal,
    }
}

/// Classify whale entry by the count of large transfers.
pub fn whale_entry(records: &[WhaleTransactionRecord]) -> WhaleEntry {
    let large = records
        .iter()
        .filter(|r| r.amount > LARGE_ENTRY_AMOUNT)
        .count();
    match large {
        0 => WhaleEntry::None,
        n if n >= 3 => WhaleEntry::Heavy,
        _ => WhaleEntry::Moderate,
    }
}
