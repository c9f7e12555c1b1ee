//! Alert fan-out.
//!
//! One rendered message per event, sent to each qualifying subscriber in
//! sequence with a fixed pacing delay. Delivery is best-effort: a failed
//! send is logged and skipped, the rest of the batch continues, and nothing
//! is retried or queued.

use crate::monitor::types::MonitorEvent;
use crate::store::{Store, Subscriber, WhaleTransactionRecord, AssetRecord, DEFAULT_WHALE_THRESHOLD};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

// ─── Subscriber cache ────────────────────────────────────────────────────────

/// Cached subscriber list, rebuilt from the store on the registry refresh
/// interval. Exposes the minimum threshold for the classifier's fallback
/// path so the scan loop never hits the store per transfer.
#[derive(Default)]
pub struct SubscriberCache {
    entries: RwLock<Vec<Subscriber>>,
}

impl SubscriberCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh(&self, store: &dyn Store) -> anyhow::Result<usize> {
        let subscribers = store.alertable_subscribers().await?;
        let count = subscribers.len();
        *self.entries.write().unwrap() = subscribers;
        debug!(subscribers = count, "subscriber cache refreshed");
        Ok(count)
    }

    pub fn all(&self) -> Vec<Subscriber> {
        self.entries.read().unwrap().clone()
    }

    /// The laxest whale threshold across subscribers; the default when
    /// nobody is registered.
    pub fn min_threshold(&self) -> f64 {
        self.entries
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.whale_alerts)
            .map(|s| s.whale_threshold)
            .fold(f64::INFINITY, f64::min)
            .min(DEFAULT_WHALE_THRESHOLD)
    }
}

// ─── Delivery channels ───────────────────────────────────────────────────────

/// A delivery channel for rendered alerts. One send per recipient.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()>;
}

/// Telegram Bot API channel.
pub struct TelegramChannel {
    http: Client,
    api_url: String,
    token: String,
}

impl TelegramChannel {
    pub fn new(api_url: String, token: String) -> Self {
        Self {
            http: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        }
    }
}

#[async_trait]
impl AlertChannel for TelegramChannel {
    async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let resp = self
            .http
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("telegram send returned status {}", resp.status());
        }
        Ok(())
    }
}

/// Log-only channel for runs without a bot token.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    async fn send(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        info!(chat_id = chat_id, "ALERT (log-only)\n{}", text);
        Ok(())
    }
}

// ─── Rendering ───────────────────────────────────────────────────────────────

/// Render the whale alert body.
pub fn render_whale_alert(record: &WhaleTransactionRecord, explorer_url: &str) -> String {
    let fresh_badge = if record.is_fresh_token { " 🔥 NEW TOKEN" } else { "" };
    let age_line = match (&record.token_age, record.is_fresh_token) {
        (Some(age), true) => format!("\n**Token age:** {}", age),
        _ => String::new(),
    };
    let footer = if record.is_fresh_token {
        "🚨 **Alpha alert — freshly created token!**"
    } else {
        "📊 Large transfer on the network"
    };

    format!(
        "🐋 **WHALE DETECTED!**{fresh_badge}\n\n\
         **Action:** {action}\n\
         **Amount:** {amount} {symbol}\n\
         **Token:** {name}\n\
         **Token address:** `{token}`{age_line}\n\n\
         **From:** `{from}`\n\
         **To:** `{to}`\n\
         **Block:** {block}\n\
         **Why:** {reason}\n\n\
         [📊 View transaction]({explorer}/tx/{hash})\n\n\
         {footer}",
        action = record.category.to_string().to_uppercase(),
        amount = record.amount,
        symbol = record.token_symbol,
        name = record.token_name,
        token = record.token_address,
        from = record.from,
        to = record.to,
        block = record.block_number,
        reason = record.reason,
        explorer = explorer_url,
        hash = record.tx_hash,
    )
}

/// Render the asset-creation alert body.
pub fn render_asset_alert(record: &AssetRecord, explorer_url: &str) -> String {
    format!(
        "🆕 **NEW IP ASSET DETECTED!**\n\n\
         **Name:** {name}\n\
         **Address:** `{address}`\n\
         **Creator:** `{creator}`\n\
         **Supply:** {supply} tokens\n\
         **Block:** {block}\n\n\
         [View on explorer]({explorer}/address/{address})\n\n\
         🚀 New alpha detected!",
        name = record.name,
        address = record.address,
        creator = record.creator,
        supply = record.initial_supply,
        block = record.block_number,
        explorer = explorer_url,
    )
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct AlertDispatcher {
    channel: std::sync::Arc<dyn AlertChannel>,
    subscribers: std::sync::Arc<SubscriberCache>,
    pacing: Duration,
    explorer_url: String,
    freshness_discount: f64,
}

impl AlertDispatcher {
    pub fn new(
        channel: std::sync::Arc<dyn AlertChannel>,
        subscribers: std::sync::Arc<SubscriberCache>,
        pacing: Duration,
        explorer_url: String,
        freshness_discount: f64,
    ) -> Self {
        Self {
            channel,
            subscribers,
            pacing,
            explorer_url,
            freshness_discount,
        }
    }

    /// Fan one event out to its qualifying subscribers. Returns how many
    /// sends succeeded.
    pub async fn dispatch(&self, event: &MonitorEvent) -> usize {
        match event {
            MonitorEvent::AssetCreated(record) => {
                let recipients: Vec<Subscriber> = self
                    .subscribers
                    .all()
                    .into_iter()
                    .filter(|s| s.asset_alerts)
                    .collect();
                let body = render_asset_alert(record, &self.explorer_url);
                self.send_batch(&recipients, &body).await
            }
            MonitorEvent::WhaleDetected { record, .. } => {
                let recipients: Vec<Subscriber> = self
                    .subscribers
                    .all()
                    .into_iter()
                    .filter(|s| s.whale_alerts && self.meets_threshold(record, s))
                    .collect();
                if recipients.is_empty() {
                    debug!(
                        amount = record.amount,
                        symbol = %record.token_symbol,
                        "no subscribers meet threshold for whale event"
                    );
                    return 0;
                }
                let body = render_whale_alert(record, &self.explorer_url);
                self.send_batch(&recipients, &body).await
            }
            MonitorEvent::Connected { .. } | MonitorEvent::Disconnected { .. } => 0,
        }
    }

    /// A whale alert reaches a subscriber iff the amount clears their own
    /// threshold, discounted while the token is fresh.
    fn meets_threshold(&self, record: &WhaleTransactionRecord, subscriber: &Subscriber) -> bool {
        let mut threshold = subscriber.whale_threshold;
        if record.is_fresh_token {
            threshold *= self.freshness_discount;
        }
        record.amount >= threshold
    }

    async fn send_batch(&self, recipients: &[Subscriber], body: &str) -> usize {
        if recipients.is_empty() {
            return 0;
        }
        info!(recipients = recipients.len(), "sending alert batch");

        let mut sent = 0;
        for (i, subscriber) in recipients.iter().enumerate() {
            match self.channel.send(subscriber.chat_id, body).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(
                        user_id = subscriber.user_id,
                        error = %e,
                        "alert send failed, skipping recipient"
                    );
                }
            }
            if i + 1 < recipients.len() {
                tokio::time::sleep(self.pacing).await;
            }
        }
        sent
    }
}
