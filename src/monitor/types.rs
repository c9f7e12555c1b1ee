//! Signals emitted by the monitor controller, consumed by the dispatch loop.

use crate::store::{AssetRecord, WhaleTransactionRecord};
use crate::whale::WhaleVerdict;

/// One message per outbound event, pushed on the monitor's event channel.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A new tokenized asset was registered on-chain (already deduplicated
    /// and persisted).
    AssetCreated(AssetRecord),

    /// A transfer was classified as whale activity (already persisted).
    WhaleDetected {
        record: WhaleTransactionRecord,
        verdict: WhaleVerdict,
    },

    /// An RPC endpoint was connected (initial or after failover).
    Connected { endpoint: String },

    /// The active endpoint failed; the controller will re-initialize
    /// before the next tick.
    Disconnected { reason: String },
}

impl std::fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AssetCreated(record) => {
                write!(f, "AssetCreated({}, {})", record.name, record.address)
            }
            Self::WhaleDetected { record, verdict } => write!(
                f,
                "WhaleDetected({} {} on {}, window={})",
                record.amount,
                record.token_symbol,
                record.token_address,
                verdict.window.as_deref().unwrap_or("single"),
            ),
            Self::Connected { endpoint } => write!(f, "Connected({})", endpoint),
            Self::Disconnected { reason } => write!(f, "Disconnected({})", reason),
        }
    }
}
