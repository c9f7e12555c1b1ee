//! Rolling volume windows per token.
//!
//! Each token carries one deque of (amount, timestamp) samples per
//! configured window. Samples older than the window are pruned from the
//! front before every evaluation, so memory is bounded by the true window
//! population. Timestamps are supplied by the caller (block/event time),
//! which keeps evaluation deterministic.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

/// One configured window: fixed duration plus the volume that trips it.
#[derive(Debug, Clone)]
pub struct VolumeWindow {
    pub duration: Duration,
    pub threshold: f64,
    pub label: String,
}

impl VolumeWindow {
    pub fn new(duration: Duration, threshold: f64) -> Self {
        let label = window_label(duration);
        Self { duration, threshold, label }
    }
}

/// "15s", "30s", "1m", "5m" — the window's display name.
fn window_label(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

/// A single observed transfer amount inside a window.
#[derive(Debug, Clone)]
struct Sample {
    amount: f64,
    at: DateTime<Utc>,
}

/// Per-token sample deques, one per configured window, in window order.
#[derive(Debug, Default)]
struct TokenWindows {
    samples: Vec<VecDeque<Sample>>,
}

/// A window whose threshold was met, with the rolled-up aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowHit {
    pub window: String,
    pub volume: f64,
    pub count: usize,
}

/// The tracker. Written only by the transfer-scanning loop.
pub struct VolumeTracker {
    windows: Vec<VolumeWindow>,
    per_token: HashMap<Address, TokenWindows>,
}

impl VolumeTracker {
    pub fn new(windows: Vec<VolumeWindow>) -> Self {
        Self {
            windows,
            per_token: HashMap::new(),
        }
    }

    /// True when no windows are configured and the single-transaction
    /// fallback path should be used instead.
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn tracked_tokens(&self) -> usize {
        self.per_token.len()
    }

    /// Record a transfer of `amount` on `token` at `at` and evaluate the
    /// windows in their configured order. The first window whose volume
    /// reaches its threshold wins; remaining windows are not evaluated for
    /// that transfer.
    pub fn record(&mut self, token: Address, amount: f64, at: DateTime<Utc>) -> Option<WindowHit> {
        let entry = self.per_token.entry(token).or_default();
        if entry.samples.len() != self.windows.len() {
            entry.samples = vec![VecDeque::new(); self.windows.len()];
        }

        for (i, window) in self.windows.iter().enumerate() {
            let deque = &mut entry.samples[i];
            deque.push_back(Sample { amount, at });

            // Prune from the front: a sample contributes only while
            // (now - sample) < duration.
            let horizon = chrono::Duration::from_std(window.duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));
            while deque
                .front()
                .map_or(false, |s| at - s.at >= horizon)
            {
                deque.pop_front();
            }

            let volume: f64 = deque.iter().map(|s| s.amount).sum();
            let count = deque.len();

            if volume >= window.threshold {
                debug!(
                    token = %token,
                    window = %window.label,
                    volume = volume,
                    count = count,
                    "volume window threshold met"
                );
                return Some(WindowHit {
                    window: window.label.clone(),
                    volume,
                    count,
                });
            }
        }

        None
    }

    /// Drop all state for a token (used once a token is excluded).
    pub fn forget(&mut self, token: Address) {
        self.per_token.remove(&token);
    }
}
